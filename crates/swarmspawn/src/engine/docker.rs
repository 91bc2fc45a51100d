//! `docker` CLI implementation of [`SwarmEngine`].

use std::env;
use std::process::{Command, Output, Stdio};

use log::{debug, warn};

use crate::settings::{EngineSettings, TlsSettings};

use super::SwarmEngine;
use super::error::{EngineError, EngineResult};
use super::types::{
    CreatedService, NameFilter, ServiceSpec, ServiceSummary, TaskSummary, validate_service_name,
};

/// Docker host used when neither the settings nor `DOCKER_HOST` name one.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Swarm engine client backed by the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    /// Path to the docker binary
    binary: String,
    /// Daemon address passed with `-H`
    host: String,
    /// Global TLS flags
    tls_flags: Vec<String>,
}

impl DockerCli {
    /// Create a client for the given binary and daemon address, without TLS.
    pub fn new(binary: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            host: host.into(),
            tls_flags: Vec::new(),
        }
    }

    /// Create a client from engine settings.
    ///
    /// The daemon address is taken from the settings, then `DOCKER_HOST`, then
    /// the local socket.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let host = settings
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| env::var("DOCKER_HOST").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string());

        Self {
            binary: settings.binary.clone(),
            host,
            tls_flags: tls_flags(&settings.tls),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run a docker subcommand and return its stdout.
    fn run(&self, label: &str, args: &[String]) -> EngineResult<String> {
        let output = self.exec(label, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::from_stderr(label, &stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn exec(&self, label: &str, args: &[String]) -> EngineResult<Output> {
        debug!("docker {} ({} args)", label, args.len());

        Command::new(&self.binary)
            .arg("-H")
            .arg(&self.host)
            .args(&self.tls_flags)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| EngineError::CommandFailed {
                command: label.to_string(),
                message: e.to_string(),
            })
    }
}

impl SwarmEngine for DockerCli {
    fn list_services(&self, filter: &NameFilter) -> EngineResult<Vec<ServiceSummary>> {
        validate_service_name(&filter.name)?;

        let args = owned(&[
            "service",
            "ls",
            "--filter",
            &format!("name={}", filter.name),
            "--format",
            "{{json .}}",
        ]);
        let stdout = self.run("service ls", &args)?;

        // The name filter matches prefixes; keep exact matches only.
        let services = parse_json_lines::<ServiceSummary>(&stdout)?
            .into_iter()
            .filter(|s| s.name == filter.name)
            .collect();
        Ok(services)
    }

    fn create_service(&self, spec: &ServiceSpec) -> EngineResult<CreatedService> {
        spec.validate()?;

        let stdout = self.run("service create", &create_service_args(spec))?;
        let id = stdout.lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(EngineError::Parse(
                "service create returned no service id".to_string(),
            ));
        }

        Ok(CreatedService { id })
    }

    fn remove_service(&self, name: &str) -> EngineResult<()> {
        validate_service_name(name)?;

        self.run("service rm", &owned(&["service", "rm", name]))?;
        Ok(())
    }

    fn list_tasks(&self, filter: &NameFilter) -> EngineResult<Vec<TaskSummary>> {
        validate_service_name(&filter.name)?;

        let stdout = self.run(
            "service ps",
            &owned(&["service", "ps", "--no-trunc", "--quiet", &filter.name]),
        )?;
        let task_ids: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = owned(&["inspect", "--type", "task", "--format", "{{json .}}"]);
        args.extend(task_ids);
        let output = self.exec("inspect", &args)?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Tasks can be pruned between `service ps` and `inspect`. The CLI still
        // prints the ones it found and exits non-zero for the rest.
        if !output.status.success() {
            match EngineError::from_stderr("inspect", &stderr) {
                EngineError::NotFound(missing) => {
                    debug!("tasks of '{}' vanished before inspect: {}", filter.name, missing)
                }
                err => return Err(err),
            }
        }

        parse_json_lines(&String::from_utf8_lossy(&output.stdout))
    }

    fn version(&self) -> EngineResult<String> {
        let stdout = self.run("version", &owned(&["version", "--format", "json"]))?;
        Ok(stdout.trim().to_string())
    }
}

/// Derive the global TLS flags for the docker CLI.
///
/// `enabled` alone means TLS without verification. Otherwise TLS is switched on
/// as soon as verification, a CA, or a client key pair is configured. The
/// client certificate is only used when both the certificate and key are set.
pub fn tls_flags(tls: &TlsSettings) -> Vec<String> {
    let mut flags = Vec::new();

    if tls.enabled {
        flags.push("--tls".to_string());
        return flags;
    }

    let client = match (&tls.cert_path, &tls.key_path) {
        (Some(cert), Some(key)) => Some((cert, key)),
        (None, None) => None,
        _ => {
            warn!("TLS client certificate and key must both be set; ignoring client auth");
            None
        }
    };

    if !tls.verify && tls.ca_path.is_none() && client.is_none() {
        return flags;
    }

    flags.push("--tls".to_string());
    if tls.verify {
        flags.push("--tlsverify".to_string());
    }
    if let Some(ref ca) = tls.ca_path {
        flags.push(format!("--tlscacert={}", ca));
    }
    if let Some((cert, key)) = client {
        flags.push(format!("--tlscert={}", cert));
        flags.push(format!("--tlskey={}", key));
    }

    flags
}

/// Render a service spec as `docker service create` arguments.
pub fn create_service_args(spec: &ServiceSpec) -> Vec<String> {
    let container = &spec.task_template.container_spec;
    let mut args = owned(&["service", "create", "--detach", "--quiet", "--name", &spec.name]);

    for (key, value) in &container.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &container.mounts {
        let mut opt = format!("type={}", mount.kind);
        if let Some(ref source) = mount.source {
            opt.push_str(&format!(",source={}", source));
        }
        opt.push_str(&format!(",target={}", mount.target));
        if mount.read_only {
            opt.push_str(",readonly");
        }
        if let Some(ref driver) = mount.volume_driver {
            opt.push_str(&format!(",volume-driver={}", driver));
        }
        for (key, value) in &mount.volume_options {
            opt.push_str(&format!(",volume-opt={}={}", key, value));
        }
        args.push("--mount".to_string());
        args.push(opt);
    }

    if let Some(ref workdir) = container.workdir {
        args.push("--workdir".to_string());
        args.push(workdir.clone());
    }

    if let Some(ref user) = container.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }

    for (key, value) in &container.labels {
        args.push("--container-label".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    for network in &spec.networks {
        args.push("--network".to_string());
        if network.aliases.is_empty() {
            args.push(network.target.clone());
        } else {
            let mut opt = format!("name={}", network.target);
            for alias in &network.aliases {
                opt.push_str(&format!(",alias={}", alias));
            }
            args.push(opt);
        }
    }

    for port in &spec.endpoint.ports {
        let mut opt = format!(
            "mode={},target={},protocol={}",
            port.publish_mode, port.target_port, port.protocol
        );
        if let Some(published) = port.published_port {
            opt.push_str(&format!(",published={}", published));
        }
        args.push("--publish".to_string());
        args.push(opt);
    }

    if let Some(ref resources) = spec.task_template.resources {
        if let Some(cpu) = resources.cpu_limit {
            args.push(format!("--limit-cpu={}", cpu));
        }
        if let Some(ref memory) = resources.memory_limit {
            args.push(format!("--limit-memory={}", memory));
        }
        if let Some(cpu) = resources.cpu_reservation {
            args.push(format!("--reserve-cpu={}", cpu));
        }
        if let Some(ref memory) = resources.memory_reservation {
            args.push(format!("--reserve-memory={}", memory));
        }
    }

    if let Some(ref restart) = spec.task_template.restart_policy {
        if let Some(condition) = restart.condition {
            args.push(format!("--restart-condition={}", condition));
        }
        if let Some(ref delay) = restart.delay {
            args.push(format!("--restart-delay={}", delay));
        }
        if let Some(attempts) = restart.max_attempts {
            args.push(format!("--restart-max-attempts={}", attempts));
        }
    }

    if let Some(ref placement) = spec.task_template.placement {
        for constraint in &placement.constraints {
            args.push("--constraint".to_string());
            args.push(constraint.clone());
        }
    }

    if !container.command.is_empty() {
        args.push("--entrypoint".to_string());
        args.push(entrypoint(&container.command));
    }

    args.push(container.image.clone());
    args.extend(container.args.iter().cloned());

    args
}

/// Join the command for `--entrypoint`, which the CLI splits shell-style.
///
/// Words outside a conservative safe set are single-quoted so spaces and
/// quotes survive the split.
fn entrypoint(command: &[String]) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c);
    command
        .iter()
        .map(|word| {
            if !word.is_empty() && word.chars().all(safe) {
                word.clone()
            } else {
                format!("'{}'", word.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// Parse `--format '{{json .}}'` output: one JSON document per line.
fn parse_json_lines<T: serde::de::DeserializeOwned>(stdout: &str) -> EngineResult<Vec<T>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| EngineError::Parse(e.to_string())))
        .collect()
}

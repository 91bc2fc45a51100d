//! Configuration.
//!
//! Loaded with the `config` crate from built-in defaults, an optional TOML file
//! and `SWARMSPAWN__SECTION__KEY` environment variables, in that order.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::engine::Mount;
use crate::naming::DEFAULT_NAME_PREFIX;
use crate::spec::{ContainerSpecOverrides, ServiceSpecOverrides, TaskTemplateOverrides};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SWARMSPAWN";

/// Default image for session services.
pub const DEFAULT_BASE_IMAGE: &str = "jupyter/scipy-notebook:2d878db5cbff";

/// Port the session server listens on inside the container.
pub const DEFAULT_SESSION_PORT: u16 = 8888;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub paths: PathsSettings,
    pub engine: EngineSettings,
    pub session: SessionSettings,
    pub hub: HubSettings,
    /// Static container spec settings.
    pub container: ContainerSettings,
    /// Static task template settings.
    pub task: TaskTemplateOverrides,
    /// Static service settings.
    pub service: ServiceSpecOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSettings {
    /// Where the CLI keeps per-user session state.
    pub state_dir: Option<String>,
}

/// Connection to the swarm manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Path to the docker binary
    pub binary: String,
    /// Daemon address; falls back to `DOCKER_HOST`.
    pub host: Option<String>,
    /// Maximum engine calls in flight, process-wide.
    pub concurrency: usize,
    pub tls: TlsSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            host: None,
            concurrency: 1,
            tls: TlsSettings::default(),
        }
    }
}

/// TLS options for the engine connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Use TLS without verifying the daemon.
    pub enabled: bool,
    /// Use TLS and verify the daemon.
    pub verify: bool,
    pub ca_path: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub name_prefix: String,
    /// Hostname of the hub as seen from session containers.
    pub hub_reachable_host: String,
    pub base_image: String,
    pub port: u16,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            hub_reachable_host: "jupyterhub".to_string(),
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            port: DEFAULT_SESSION_PORT,
        }
    }
}

/// Hub values the CLI uses when acting as the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub api_url: String,
    pub prefix: String,
    /// Prefix of per-user URLs; the session base URL is `<user_prefix><user>/`.
    pub user_prefix: String,
    /// Cookie name stem; the session cookie is `<cookie_name>-<user>`.
    pub cookie_name: String,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8081/hub/api".to_string(),
            prefix: "/hub/".to_string(),
            user_prefix: "/user/".to_string(),
            cookie_name: "jupyter-hub-token".to_string(),
        }
    }
}

/// Wrapper so the default config ships with a work volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerSettings(pub ContainerSpecOverrides);

impl Default for ContainerSettings {
    fn default() -> Self {
        Self(ContainerSpecOverrides {
            mounts: Some(vec![Mount::volume("/home/jovyan/work")]),
            ..Default::default()
        })
    }
}

impl Settings {
    /// Load settings from an optional TOML file plus environment overrides.
    pub fn load(config_file: &Path) -> Result<Self> {
        let built = Config::builder()
            .add_source(
                File::from(config_file)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("reading config {}", config_file.display()))?;

        let mut settings: Settings = built
            .try_deserialize()
            .context("deserializing configuration")?;
        settings.expand_paths()?;
        Ok(settings)
    }

    /// Expand `~` and environment variables in path options.
    pub fn expand_paths(&mut self) -> Result<()> {
        let tls = &mut self.engine.tls;
        for path in [
            &mut tls.ca_path,
            &mut tls.cert_path,
            &mut tls.key_path,
            &mut self.paths.state_dir,
        ]
        .into_iter()
        .flatten()
        {
            *path = shellexpand::full(path.as_str())
                .with_context(|| format!("expanding path {}", path))?
                .into_owned();
        }
        Ok(())
    }

    /// Serialize as a TOML document.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config to TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_match_reference_deployment() {
        let settings = Settings::default();
        assert_eq!(settings.session.name_prefix, "notebook");
        assert_eq!(settings.session.hub_reachable_host, "jupyterhub");
        assert_eq!(settings.session.port, 8888);
        assert_eq!(settings.engine.concurrency, 1);
        assert_eq!(settings.container.0.mounts.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.engine.binary, "docker");
        assert_eq!(settings.session.base_image, DEFAULT_BASE_IMAGE);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[engine]
host = "tcp://manager:2376"
concurrency = 2

[engine.tls]
verify = true
ca_path = "/certs/ca.pem"

[session]
name_prefix = "lab"
hub_reachable_host = "hubsvc"

[container]
command = ["tini", "--", "start-singleuser.sh"]
args = ["--debug"]

[[container.mounts]]
target = "/home/jovyan/work"
volume_driver = "convoy"

[service]
networks = [{ target = "swarm-net" }]
ports = [{ target_port = 4040 }, { target_port = 8080, protocol = "tcp" }]
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.engine.host.as_deref(), Some("tcp://manager:2376"));
        assert_eq!(settings.engine.concurrency, 2);
        assert!(settings.engine.tls.verify);
        assert_eq!(settings.session.name_prefix, "lab");
        assert_eq!(settings.session.port, DEFAULT_SESSION_PORT);

        let container = &settings.container.0;
        assert_eq!(container.args.as_deref(), Some(&["--debug".to_string()][..]));
        let mounts = container.mounts.as_ref().unwrap();
        assert_eq!(mounts[0].volume_driver.as_deref(), Some("convoy"));

        let ports = settings.service.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[1].target_port, 8080);
    }

    #[test]
    fn default_settings_serialize_to_toml() {
        let toml = Settings::default().to_toml().unwrap();
        assert!(toml.contains("[session]"));
        assert!(toml.contains("name_prefix = \"notebook\""));
    }
}

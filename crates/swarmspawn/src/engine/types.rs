//! Engine records and workload specifications.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

/// Maximum length of a swarm service name.
pub const MAX_SERVICE_NAME_LEN: usize = 63;

// ============================================================================
// Engine records
// ============================================================================

/// Service information from `service ls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSummary {
    /// Service ID.
    #[serde(rename = "ID", alias = "Id")]
    pub id: String,

    /// Service name.
    pub name: String,

    /// Image reference.
    #[serde(default)]
    pub image: String,

    /// Scheduling mode (e.g. "replicated").
    #[serde(default)]
    pub mode: String,

    /// Replica summary (e.g. "1/1").
    #[serde(default)]
    pub replicas: String,
}

/// Task status block as reported by `inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStatus {
    /// Raw state string (e.g. "running", "shutdown").
    #[serde(default)]
    pub state: String,

    /// Human readable message from the engine.
    #[serde(default)]
    pub message: String,

    /// RFC 3339 timestamp of the last status change.
    #[serde(default)]
    pub timestamp: String,
}

/// Task information for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskSummary {
    /// Task ID.
    #[serde(rename = "ID", alias = "Id")]
    pub id: String,

    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
}

/// Filter applied to list calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    pub name: String,
}

impl NameFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Result of a successful service creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedService {
    pub id: String,
}

// ============================================================================
// Workload specification
// ============================================================================

/// Mount type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    #[default]
    Volume,
    Bind,
    Tmpfs,
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountType::Volume => write!(f, "volume"),
            MountType::Bind => write!(f, "bind"),
            MountType::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

/// A mount attached to the session container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    /// Path inside the container.
    pub target: String,
    /// Volume name or host path. Rewritten to the session's mount source name.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: MountType,
    #[serde(default)]
    pub read_only: bool,
    /// Volume driver (e.g. "convoy").
    #[serde(default)]
    pub volume_driver: Option<String>,
    #[serde(default)]
    pub volume_options: BTreeMap<String, String>,
}

impl Mount {
    /// Create a volume mount for the given target with no source yet.
    pub fn volume(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.volume_driver = Some(driver.into());
        self
    }
}

/// Container-level settings of a workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    /// Entrypoint override. Services replace the image entrypoint with this.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Resource limits and reservations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU limit in cores.
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    /// Memory limit (e.g. "2g").
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub cpu_reservation: Option<f64>,
    #[serde(default)]
    pub memory_reservation: Option<String>,
}

/// When the engine should restart a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartCondition {
    None,
    OnFailure,
    Any,
}

impl fmt::Display for RestartCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartCondition::None => write!(f, "none"),
            RestartCondition::OnFailure => write!(f, "on-failure"),
            RestartCondition::Any => write!(f, "any"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    #[serde(default)]
    pub condition: Option<RestartCondition>,
    /// Delay between restart attempts (e.g. "5s").
    #[serde(default)]
    pub delay: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Task template: the container spec plus scheduling settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub container_spec: ContainerSpec,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
    #[serde(default)]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default)]
    pub placement: Option<Placement>,
}

/// Network the service joins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub target: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl NetworkAttachment {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            aliases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => write!(f, "tcp"),
            PortProtocol::Udp => write!(f, "udp"),
            PortProtocol::Sctp => write!(f, "sctp"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    #[default]
    Ingress,
    Host,
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Ingress => write!(f, "ingress"),
            PublishMode::Host => write!(f, "host"),
        }
    }
}

/// A port published by the swarm routing mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub target_port: u16,
    /// Published port; the engine assigns one when absent.
    #[serde(default)]
    pub published_port: Option<u16>,
    #[serde(default)]
    pub protocol: PortProtocol,
    #[serde(default)]
    pub publish_mode: PublishMode,
}

impl PortConfig {
    pub fn tcp(target_port: u16) -> Self {
        Self {
            target_port,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

/// Complete service specification passed to `create_service`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub task_template: TaskTemplate,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    #[serde(default)]
    pub endpoint: EndpointSpec,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// Validate every field that ends up on the engine command line.
    pub fn validate(&self) -> EngineResult<()> {
        validate_service_name(&self.name)?;

        let container = &self.task_template.container_spec;
        validate_image_name(&container.image)?;

        for key in container.env.keys() {
            validate_env_var_key(key)?;
        }

        for mount in &container.mounts {
            validate_container_path(&mount.target)?;
            if let Some(ref source) = mount.source {
                validate_mount_source(source)?;
            }
        }

        if let Some(ref workdir) = container.workdir {
            validate_container_path(workdir)?;
        }

        for network in &self.networks {
            if network.target.is_empty() {
                return Err(EngineError::InvalidInput(
                    "network target cannot be empty".to_string(),
                ));
            }
        }

        for port in &self.endpoint.ports {
            if port.target_port == 0 {
                return Err(EngineError::InvalidInput(
                    "target port must be non-zero".to_string(),
                ));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validate a swarm service name.
///
/// Service names are alphanumeric with hyphens and underscores, start with an
/// alphanumeric character and are at most 63 characters long.
pub fn validate_service_name(name: &str) -> EngineResult<()> {
    let Some(first) = name.chars().next() else {
        return Err(EngineError::InvalidInput(
            "service name cannot be empty".to_string(),
        ));
    };

    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(EngineError::InvalidInput(format!(
            "service name '{}' exceeds maximum length of {} characters",
            name, MAX_SERVICE_NAME_LEN
        )));
    }

    if !first.is_ascii_alphanumeric() {
        return Err(EngineError::InvalidInput(
            "service name must start with an alphanumeric character".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !name.chars().all(valid_chars) {
        return Err(EngineError::InvalidInput(format!(
            "service name '{}' contains invalid characters; only alphanumeric, '-', '_' are allowed",
            name
        )));
    }

    Ok(())
}

/// Check an image reference before it reaches the CLI.
///
/// Image names follow the pattern: `[registry/][namespace/]name[:tag][@digest]`
pub fn validate_image_name(image: &str) -> EngineResult<()> {
    if image.is_empty() {
        return Err(EngineError::InvalidInput(
            "image reference is empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(EngineError::InvalidInput(
            "image reference longer than 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@')
    };
    if !image.chars().all(valid_chars) {
        return Err(EngineError::InvalidInput(format!(
            "image name '{}' contains invalid characters",
            image
        )));
    }

    if image.contains("..") {
        return Err(EngineError::InvalidInput(
            "image reference contains '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate an environment variable key (POSIX conventions).
fn validate_env_var_key(key: &str) -> EngineResult<()> {
    let Some(first) = key.chars().next() else {
        return Err(EngineError::InvalidInput(
            "env key is empty".to_string(),
        ));
    };

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(EngineError::InvalidInput(format!(
            "env key '{}' must start with a letter or underscore",
            key
        )));
    }

    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EngineError::InvalidInput(format!(
            "environment variable key '{}' contains invalid characters",
            key
        )));
    }

    Ok(())
}

/// Validate a mount source. Commas would split the `--mount` option.
fn validate_mount_source(source: &str) -> EngineResult<()> {
    if source.is_empty() {
        return Err(EngineError::InvalidInput(
            "mount source cannot be empty".to_string(),
        ));
    }

    if source.contains(',') || source.contains('\0') || source.contains('=') {
        return Err(EngineError::InvalidInput(format!(
            "mount source '{}' contains invalid characters",
            source
        )));
    }

    Ok(())
}

/// Validate a container-internal path.
fn validate_container_path(path: &str) -> EngineResult<()> {
    if !path.starts_with('/') {
        return Err(EngineError::InvalidInput(format!(
            "container path '{}' must be absolute",
            path
        )));
    }

    if path.contains('\0') || path.contains(',') {
        return Err(EngineError::InvalidInput(format!(
            "container path '{}' contains invalid characters",
            path
        )));
    }

    Ok(())
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    fn spec(name: &str, image: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            task_template: TaskTemplate {
                container_spec: ContainerSpec {
                    image: image.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_service_name() {
        assert!(validate_service_name("notebook-alice").is_ok());
        assert!(validate_service_name("notebook_bob2").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("-leading").is_err());
        assert!(validate_service_name("has space").is_err());
        assert!(validate_service_name("a.b").is_err());
        assert!(validate_service_name(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_image_name() {
        assert!(validate_image_name("jupyter/scipy-notebook:2d878db5cbff").is_ok());
        assert!(validate_image_name("gcr.io/project/image@sha256:abc123").is_ok());
        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("image;rm -rf /").is_err());
        assert!(validate_image_name("../../etc/passwd").is_err());
    }

    #[test]
    fn test_validate_env_var_key() {
        assert!(validate_env_var_key("HUB_API_URL").is_ok());
        assert!(validate_env_var_key("_PRIVATE").is_ok());
        assert!(validate_env_var_key("123VAR").is_err());
        assert!(validate_env_var_key("MY-VAR").is_err());
    }

    #[test]
    fn test_service_spec_validate() {
        let mut ok = spec("notebook-alice", "jupyter/base-notebook");
        ok.task_template.container_spec.mounts.push(Mount {
            source: Some("notebook-alice".to_string()),
            ..Mount::volume("/home/jovyan/work")
        });
        assert!(ok.validate().is_ok());

        let mut bad_mount = ok.clone();
        bad_mount.task_template.container_spec.mounts[0].target = "relative".to_string();
        assert!(bad_mount.validate().is_err());

        assert!(spec("notebook alice", "img").validate().is_err());
        assert!(spec("notebook-alice", "img$(id)").validate().is_err());
    }

    #[test]
    fn test_task_summary_parses_inspect_output() {
        let raw = r#"{"ID":"t1","Status":{"Timestamp":"2024-05-01T10:00:00.5Z","State":"running","Message":"started"}}"#;
        let task: TaskSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(task.status.state, "running");
        assert_eq!(task.status.message, "started");
    }

    #[test]
    fn test_service_summary_parses_ls_line() {
        let raw = r#"{"ID":"abc123","Image":"jupyter/base-notebook:latest","Mode":"replicated","Name":"notebook-alice","Ports":"*:30000->4040/tcp","Replicas":"1/1"}"#;
        let service: ServiceSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(service.id, "abc123");
        assert_eq!(service.name, "notebook-alice");
        assert_eq!(service.replicas, "1/1");
    }
}

//! Orchestration engine client.
//!
//! The engine is a Docker swarm manager. [`SwarmEngine`] is the blocking client
//! contract; [`DockerCli`] implements it by driving the `docker` CLI. Callers on
//! the async side go through [`crate::adapter::EngineCallAdapter`], which moves
//! every call onto the blocking pool.

mod docker;
mod error;
mod types;

pub use docker::DockerCli;
pub use error::{EngineError, EngineResult};
pub use types::{
    ContainerSpec, CreatedService, EndpointSpec, Mount, MountType, NameFilter,
    NetworkAttachment, Placement, PortConfig, PortProtocol, PublishMode, ResourceSpec,
    RestartCondition, RestartPolicy, ServiceSpec, ServiceSummary, TaskStatus, TaskSummary,
    TaskTemplate, MAX_SERVICE_NAME_LEN, validate_image_name, validate_service_name,
};

/// Blocking swarm engine client.
///
/// Implementations may block the calling thread for the duration of the
/// request and must be safe to share between threads.
pub trait SwarmEngine: Send + Sync {
    /// List services matching the filter.
    fn list_services(&self, filter: &NameFilter) -> EngineResult<Vec<ServiceSummary>>;

    /// Create a service and return its ID.
    fn create_service(&self, spec: &ServiceSpec) -> EngineResult<CreatedService>;

    /// Remove a service by name or ID.
    fn remove_service(&self, name: &str) -> EngineResult<()>;

    /// List the tasks of the service matching the filter.
    fn list_tasks(&self, filter: &NameFilter) -> EngineResult<Vec<TaskSummary>>;

    /// Engine version information, used as a health check.
    fn version(&self) -> EngineResult<String>;
}

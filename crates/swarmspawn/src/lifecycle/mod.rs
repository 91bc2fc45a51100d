//! Session lifecycle controller.
//!
//! Reconciles "this user has a running session" against the services and tasks
//! on the swarm. Each controller owns one user's [`SessionStateRecord`]; the
//! engine call queue and the per-session locks are shared through [`Spawner`].
//!
//! Logical states: no session, creating, active (running / exited / unknown by
//! poll), stopping. Only the workload id is remembered between calls.

mod locks;
mod state;

pub use locks::{SessionGuard, SessionLocks};
pub use state::SessionStateRecord;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use log::{debug, info, warn};

use crate::adapter::{EngineCallAdapter, LookupOutcome};
use crate::engine::TaskSummary;
use crate::error::SpawnResult;
use crate::settings::{DEFAULT_SESSION_PORT, Settings};
use crate::spec::{SessionContext, SpecAssembler, StartOverrides};

/// Result of polling a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// The latest task is running.
    Running,
    /// The latest task exists but is not running; carries the raw engine state.
    NotRunning(String),
    /// No workload or no tasks.
    Absent,
}

impl PollStatus {
    /// Map a raw task state. Only "running" (any case) counts as running.
    pub fn from_task_state(state: &str) -> Self {
        if state.eq_ignore_ascii_case("running") {
            PollStatus::Running
        } else {
            PollStatus::NotRunning(state.to_string())
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PollStatus::Running)
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollStatus::Running => write!(f, "running"),
            PollStatus::NotRunning(state) => write!(f, "not running ({})", state),
            PollStatus::Absent => write!(f, "absent"),
        }
    }
}

/// Where the front-end reaches a started session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    /// The service name, resolvable on the shared swarm network.
    pub host: String,
    pub port: u16,
}

/// Capability contract for a workload lifecycle backend.
#[async_trait]
pub trait SessionBackend: Send {
    /// Ensure the session's workload exists, creating it if needed.
    async fn start(&mut self, overrides: StartOverrides) -> SpawnResult<SessionEndpoint>;

    /// Remove the workload. Missing workloads count as removed.
    async fn stop(&mut self) -> SpawnResult<()>;

    /// Check the workload. Never fails; lookup errors report `Absent`.
    async fn poll(&mut self) -> PollStatus;

    fn get_state(&self) -> SessionStateRecord;

    fn load_state(&mut self, state: SessionStateRecord);
}

/// Process-wide pieces shared by all session controllers.
#[derive(Debug, Clone)]
pub struct Spawner {
    adapter: EngineCallAdapter,
    locks: SessionLocks,
    assembler: Arc<SpecAssembler>,
    session_port: u16,
}

impl Spawner {
    pub fn new(adapter: EngineCallAdapter, assembler: SpecAssembler) -> Self {
        Self {
            adapter,
            locks: SessionLocks::new(),
            assembler: Arc::new(assembler),
            session_port: DEFAULT_SESSION_PORT,
        }
    }

    pub fn from_settings(adapter: EngineCallAdapter, settings: &Settings) -> Self {
        Self::new(adapter, SpecAssembler::from_settings(settings))
            .session_port(settings.session.port)
    }

    /// Set the port sessions listen on.
    pub fn session_port(mut self, port: u16) -> Self {
        self.session_port = port;
        self
    }

    pub fn adapter(&self) -> &EngineCallAdapter {
        &self.adapter
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Controller for one user's session, starting with empty state.
    pub fn controller(&self, context: SessionContext) -> SwarmSessionController {
        let name = self.assembler.naming().session_name(&context.user);
        SwarmSessionController {
            shared: self.clone(),
            context,
            name,
            state: SessionStateRecord::default(),
        }
    }
}

/// Runs one user's session as a single-replica swarm service.
#[derive(Debug)]
pub struct SwarmSessionController {
    shared: Spawner,
    context: SessionContext,
    /// Service name, `<prefix>-<user>`.
    name: String,
    state: SessionStateRecord,
}

impl SwarmSessionController {
    pub fn session_name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> SessionEndpoint {
        SessionEndpoint {
            host: self.name.clone(),
            port: self.shared.session_port,
        }
    }
}

#[async_trait]
impl SessionBackend for SwarmSessionController {
    async fn start(&mut self, overrides: StartOverrides) -> SpawnResult<SessionEndpoint> {
        // Configuration errors surface before any engine call.
        let spec = self.shared.assembler.build_spec(&self.context, &overrides)?;

        let _guard = self.shared.locks.lock(&self.name).await;

        debug!("Getting service '{}'", self.name);
        match self.shared.adapter.find_service(&self.name).await {
            LookupOutcome::Found(service) => {
                info!("Found existing service '{}' (ID: {})", self.name, service.id);
                self.state.workload_id = Some(service.id);
            }
            LookupOutcome::Absent => {
                let image = spec.task_template.container_spec.image.clone();
                debug!("Creating service '{}': {:?}", self.name, spec);

                let created = self.shared.adapter.create_service(spec).await?;
                info!(
                    "Created service '{}' (ID: {}) from image {}",
                    self.name, created.id, image
                );
                self.state.workload_id = Some(created.id);
            }
            LookupOutcome::Failed(e) => return Err(e.into()),
        }

        Ok(self.endpoint())
    }

    async fn stop(&mut self) -> SpawnResult<()> {
        let _guard = self.shared.locks.lock(&self.name).await;

        info!(
            "Removing service '{}' (ID: {})",
            self.name,
            self.state.workload_id().unwrap_or("unknown")
        );
        match self.shared.adapter.remove_service(&self.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Service '{}' already gone", self.name);
            }
            Err(e) => return Err(e.into()),
        }

        self.state.clear();
        Ok(())
    }

    async fn poll(&mut self) -> PollStatus {
        if self.state.is_empty() {
            debug!("Service '{}' has no recorded workload", self.name);
            return PollStatus::Absent;
        }

        debug!("Polling service '{}'", self.name);
        let status = match self.shared.adapter.find_tasks(&self.name).await {
            LookupOutcome::Found(tasks) => latest_task(&tasks)
                .map(|task| PollStatus::from_task_state(&task.status.state))
                .unwrap_or(PollStatus::Absent),
            LookupOutcome::Absent => PollStatus::Absent,
            LookupOutcome::Failed(e) => {
                // A failed lookup reads as "gone" so the periodic check never errors.
                warn!(
                    "Error retrieving tasks for service '{}', reporting absent: {}",
                    self.name, e
                );
                PollStatus::Absent
            }
        };

        debug!("Status for service '{}': {}", self.name, status);
        status
    }

    fn get_state(&self) -> SessionStateRecord {
        self.state.clone()
    }

    fn load_state(&mut self, state: SessionStateRecord) {
        self.state = state.normalized();
    }
}

/// The task with the newest status timestamp.
///
/// Tasks whose timestamp does not parse lose to any that do; among equals the
/// first listed wins.
fn latest_task(tasks: &[TaskSummary]) -> Option<&TaskSummary> {
    let parsed = |task: &TaskSummary| -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&task.status.timestamp).ok()
    };

    let mut iter = tasks.iter();
    let mut best = iter.next()?;
    let mut best_time = parsed(best);

    for task in iter {
        let time = parsed(task);
        let newer = match (time, best_time) {
            (Some(t), Some(b)) => t > b,
            (Some(_), None) => true,
            _ => false,
        };
        if newer {
            best = task;
            best_time = time;
        }
    }

    Some(best)
}

//! Non-blocking, ordered access to the blocking engine client.
//!
//! Every call is queued on one channel and dispatched onto the blocking pool in
//! issuance order, with at most `concurrency` calls in flight process-wide.
//! With the default concurrency of 1 all engine traffic is serialized. Calls
//! from different sessions may interleave between individual calls.
//!
//! A call that has been queued runs to completion even if the caller stops
//! waiting for it.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::engine::{
    CreatedService, EngineError, EngineResult, NameFilter, ServiceSpec, ServiceSummary,
    SwarmEngine, TaskSummary,
};

/// Default number of engine calls allowed in flight.
pub const DEFAULT_CONCURRENCY: usize = 1;

type Job = Box<dyn FnOnce(&dyn SwarmEngine) + Send + 'static>;

/// Outcome of looking something up on the engine.
#[derive(Debug)]
pub enum LookupOutcome<T> {
    Found(T),
    Absent,
    Failed(EngineError),
}

impl<T> LookupOutcome<T> {
    /// `NotFound` errors become `Absent`; other errors become `Failed`.
    fn from_result(result: EngineResult<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => LookupOutcome::Found(value),
            Ok(None) => LookupOutcome::Absent,
            Err(e) if e.is_not_found() => LookupOutcome::Absent,
            Err(e) => LookupOutcome::Failed(e),
        }
    }

}

struct Inner {
    jobs: mpsc::UnboundedSender<Job>,
    concurrency: usize,
}

/// Shared handle to the engine call queue.
///
/// Create one per process and clone it into every session controller.
#[derive(Clone)]
pub struct EngineCallAdapter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EngineCallAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCallAdapter")
            .field("concurrency", &self.inner.concurrency)
            .finish()
    }
}

impl EngineCallAdapter {
    /// Start the dispatcher for `engine`.
    ///
    /// Must be called from within a tokio runtime. A concurrency of 0 is
    /// treated as 1.
    pub fn new(engine: Arc<dyn SwarmEngine>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(engine, rx, concurrency));

        Self {
            inner: Arc::new(Inner { jobs, concurrency }),
        }
    }

    /// Queue `f` against the engine and wait for its result.
    pub async fn call<T, F>(&self, op: &'static str, f: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SwarmEngine) -> EngineResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |engine| {
            // The caller may have stopped waiting.
            let _ = tx.send(f(engine));
        });

        self.inner
            .jobs
            .send(job)
            .map_err(|_| EngineError::WorkerUnavailable)?;
        debug!("queued engine call {}", op);

        rx.await.map_err(|_| EngineError::WorkerUnavailable)?
    }

    pub async fn list_services(&self, name: &str) -> EngineResult<Vec<ServiceSummary>> {
        let filter = NameFilter::new(name);
        self.call("list_services", move |engine| engine.list_services(&filter))
            .await
    }

    pub async fn create_service(&self, spec: ServiceSpec) -> EngineResult<CreatedService> {
        self.call("create_service", move |engine| engine.create_service(&spec))
            .await
    }

    pub async fn remove_service(&self, name: &str) -> EngineResult<()> {
        let name = name.to_string();
        self.call("remove_service", move |engine| engine.remove_service(&name))
            .await
    }

    pub async fn list_tasks(&self, name: &str) -> EngineResult<Vec<TaskSummary>> {
        let filter = NameFilter::new(name);
        self.call("list_tasks", move |engine| engine.list_tasks(&filter))
            .await
    }

    pub async fn version(&self) -> EngineResult<String> {
        self.call("version", |engine| engine.version()).await
    }

    /// Look up the service with exactly this name.
    pub async fn find_service(&self, name: &str) -> LookupOutcome<ServiceSummary> {
        let result = self
            .list_services(name)
            .await
            .map(|services| services.into_iter().find(|s| s.name == name));
        LookupOutcome::from_result(result)
    }

    /// Look up the tasks of a service. No tasks is `Absent`.
    pub async fn find_tasks(&self, name: &str) -> LookupOutcome<Vec<TaskSummary>> {
        let result = self
            .list_tasks(name)
            .await
            .map(|tasks| Some(tasks).filter(|t| !t.is_empty()));
        LookupOutcome::from_result(result)
    }
}

async fn dispatch(
    engine: Arc<dyn SwarmEngine>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    concurrency: usize,
) {
    let permits = Arc::new(Semaphore::new(concurrency));

    while let Some(job) = jobs.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            warn!("engine call semaphore closed; stopping dispatcher");
            break;
        };
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            job(engine.as_ref());
            drop(permit);
        });
    }

    debug!("engine call dispatcher stopped");
}

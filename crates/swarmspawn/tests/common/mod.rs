#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use swarmspawn::engine::{
    CreatedService, EngineError, EngineResult, NameFilter, ServiceSpec, ServiceSummary,
    SwarmEngine, TaskStatus, TaskSummary,
};
use swarmspawn::{EngineCallAdapter, SessionContext, SpecAssembler, Spawner};

/// In-memory swarm. Services live in a map; tasks are scripted per service.
#[derive(Default)]
pub struct FakeEngine {
    pub calls: Mutex<Vec<String>>,
    pub services: Mutex<BTreeMap<String, String>>,
    pub tasks: Mutex<HashMap<String, Vec<TaskSummary>>>,
    pub created: Mutex<Vec<ServiceSpec>>,
    pub fail_lookups: Mutex<Option<String>>,
    pub fail_remove: Mutex<Option<String>>,
    pub create_delay: Mutex<Option<Duration>>,
    next_id: Mutex<u32>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_service(self: &Arc<Self>, name: &str, id: &str) -> Arc<Self> {
        self.services
            .lock()
            .unwrap()
            .insert(name.to_string(), id.to_string());
        self.clone()
    }

    pub fn set_tasks(&self, name: &str, tasks: Vec<TaskSummary>) {
        self.tasks.lock().unwrap().insert(name.to_string(), tasks);
    }

    pub fn fail_lookups_with(&self, message: &str) {
        *self.fail_lookups.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_remove_with(&self, message: &str) {
        *self.fail_remove.lock().unwrap() = Some(message.to_string());
    }

    pub fn slow_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(op)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn lookup_failure(&self, command: &str) -> EngineResult<()> {
        match self.fail_lookups.lock().unwrap().clone() {
            Some(message) => Err(EngineError::CommandFailed {
                command: command.to_string(),
                message,
            }),
            None => Ok(()),
        }
    }
}

impl SwarmEngine for FakeEngine {
    fn list_services(&self, filter: &NameFilter) -> EngineResult<Vec<ServiceSummary>> {
        self.record(format!("list_services {}", filter.name));
        self.lookup_failure("service ls")?;

        // Docker's name filter matches on prefix.
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(&filter.name))
            .map(|(name, id)| ServiceSummary {
                id: id.clone(),
                name: name.clone(),
                image: String::new(),
                mode: "replicated".to_string(),
                replicas: "1/1".to_string(),
            })
            .collect())
    }

    fn create_service(&self, spec: &ServiceSpec) -> EngineResult<CreatedService> {
        self.record(format!("create_service {}", spec.name));
        if let Some(delay) = *self.create_delay.lock().unwrap() {
            thread::sleep(delay);
        }

        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("svc-{}", next)
        };

        let mut services = self.services.lock().unwrap();
        if services.contains_key(&spec.name) {
            return Err(EngineError::CommandFailed {
                command: "service create".to_string(),
                message: format!("name conflicts with an existing object: {}", spec.name),
            });
        }
        services.insert(spec.name.clone(), id.clone());
        self.created.lock().unwrap().push(spec.clone());
        Ok(CreatedService { id })
    }

    fn remove_service(&self, name: &str) -> EngineResult<()> {
        self.record(format!("remove_service {}", name));
        if let Some(message) = self.fail_remove.lock().unwrap().clone() {
            return Err(EngineError::CommandFailed {
                command: "service rm".to_string(),
                message,
            });
        }

        match self.services.lock().unwrap().remove(name) {
            Some(_) => {
                self.tasks.lock().unwrap().remove(name);
                Ok(())
            }
            None => Err(EngineError::NotFound(name.to_string())),
        }
    }

    fn list_tasks(&self, filter: &NameFilter) -> EngineResult<Vec<TaskSummary>> {
        self.record(format!("list_tasks {}", filter.name));
        self.lookup_failure("service ps")?;

        if !self.services.lock().unwrap().contains_key(&filter.name) {
            return Err(EngineError::NotFound(filter.name.clone()));
        }
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .get(&filter.name)
            .cloned()
            .unwrap_or_default())
    }

    fn version(&self) -> EngineResult<String> {
        self.record("version".to_string());
        Ok(r#"{"Server":{"Version":"24.0.7"}}"#.to_string())
    }
}

pub fn task(id: &str, state: &str, timestamp: &str) -> TaskSummary {
    TaskSummary {
        id: id.to_string(),
        status: TaskStatus {
            state: state.to_string(),
            message: String::new(),
            timestamp: timestamp.to_string(),
        },
    }
}

pub fn context(user: &str) -> SessionContext {
    SessionContext {
        user: user.to_string(),
        cookie_name: format!("jupyter-hub-token-{user}"),
        base_url: format!("/user/{user}/"),
        hub_prefix: "/hub/".to_string(),
        hub_api_url: "http://127.0.0.1:8081/hub/api".to_string(),
        env: BTreeMap::new(),
    }
}

/// Spawner with default settings on top of a fake engine.
pub fn spawner(engine: Arc<FakeEngine>) -> Spawner {
    let settings = swarmspawn::settings::Settings::default();
    let adapter = EngineCallAdapter::new(engine, settings.engine.concurrency);
    Spawner::new(adapter, SpecAssembler::from_settings(&settings))
}

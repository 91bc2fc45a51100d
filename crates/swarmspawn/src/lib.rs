//! Swarmspawn
//!
//! Runs one session service per user on a Docker swarm: assembles the service
//! spec, starts it idempotently, polls its task state and removes it again.

pub mod adapter;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod settings;
pub mod spec;

pub use adapter::{EngineCallAdapter, LookupOutcome};
pub use error::{ConfigurationError, SpawnError, SpawnResult};
pub use lifecycle::{
    PollStatus, SessionBackend, SessionEndpoint, SessionStateRecord, Spawner,
    SwarmSessionController,
};
pub use naming::NamingPolicy;
pub use spec::{SessionContext, SpecAssembler, StartOverrides};

//! File-backed session state, one JSON document per user.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};

use swarmspawn::SessionStateRecord;
use swarmspawn::engine::validate_service_name;

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File for `user`. Identities that could not name a service are refused,
    /// which also keeps separators and `..` out of the path.
    fn path_for(&self, user: &str) -> Result<PathBuf> {
        validate_service_name(user).with_context(|| format!("invalid user identity '{user}'"))?;
        Ok(self.dir.join(format!("{}.json", user)))
    }

    /// Load a user's record; a missing file is an empty record.
    pub fn load(&self, user: &str) -> Result<SessionStateRecord> {
        let path = self.path_for(user)?;
        match fs::read_to_string(&path) {
            Ok(body) => serde_json::from_str(&body)
                .with_context(|| format!("parsing session state {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SessionStateRecord::default()),
            Err(e) => {
                Err(e).with_context(|| format!("reading session state {}", path.display()))
            }
        }
    }

    pub fn save(&self, user: &str, record: &SessionStateRecord) -> Result<()> {
        let path = self.path_for(user)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating state directory {}", self.dir.display()))?;

        let body = serde_json::to_string_pretty(record).context("serializing session state")?;
        fs::write(&path, body)
            .with_context(|| format!("writing session state {}", path.display()))
    }
}

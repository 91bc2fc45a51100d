//! Per-session mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Async locks keyed by session name, shared by all controllers in a process.
///
/// Holding the guard serializes `start` and `stop` for one session so the
/// "look up, else create" sequence cannot race with itself in-process. An entry
/// lives only while some caller holds or waits for it.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    locks: Arc<LockMap>,
}

/// Exclusive access to one session name. Dropping it releases the lock.
#[derive(Debug)]
pub struct SessionGuard {
    name: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> SessionGuard {
        // Cloned under the shard lock, so `SessionGuard::drop` sees this waiter.
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        SessionGuard {
            name: name.to_string(),
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits for it.
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_is_exclusive() {
        let locks = SessionLocks::new();
        let guard = locks.lock("notebook-alice").await;

        let waiting = tokio::time::timeout(Duration::from_millis(20), locks.lock("notebook-alice")).await;
        assert!(waiting.is_err());

        drop(guard);
        let _again = locks.lock("notebook-alice").await;
    }

    #[tokio::test]
    async fn different_names_do_not_block() {
        let locks = SessionLocks::new();
        let _alice = locks.lock("notebook-alice").await;
        let _bob = tokio::time::timeout(Duration::from_millis(20), locks.lock("notebook-bob"))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_names_are_forgotten() {
        let locks = SessionLocks::new();
        for user in ["alice", "bob", "carol"] {
            let _guard = locks.lock(&format!("notebook-{user}")).await;
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_someone_waits() {
        let locks = SessionLocks::new();
        let first = locks.lock("notebook-alice").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("notebook-alice").await;
            })
        };
        // Let the waiter register before the holder lets go.
        while Arc::strong_count(&locks.locks.get("notebook-alice").unwrap()) < 3 {
            tokio::task::yield_now().await;
        }

        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}

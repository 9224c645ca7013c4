//! Per-issue mutual exclusion
//!
//! A webhook delivery and a polling cycle can reach the same issue at the
//! same moment. Both would search, find no task, and create one each. Holding
//! the issue's lock across link, diff and write closes that window within a
//! process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Async locks keyed by issue (`owner/name#number`)
///
/// Entries are created on demand and removed once nobody holds or waits on
/// them, so the map only ever contains issues in flight.
#[derive(Clone, Default)]
pub struct IssueLocks {
    locks: Arc<Mutex<LockMap>>,
}

/// Held lock for one issue; released on drop
pub struct IssueGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    locks: Arc<Mutex<LockMap>>,
}

fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl IssueLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &str) -> IssueGuard {
        let lock = lock_map(&self.locks)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let guard = lock.clone().lock_owned().await;

        IssueGuard {
            key: key.to_string(),
            guard: Some(guard),
            lock,
            locks: self.locks.clone(),
        }
    }

    /// Number of issues currently locked or awaited
    pub fn in_flight(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

impl IssueGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for IssueGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut map = lock_map(&self.locks);
        // map entry + ours: nobody else holds or waits
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.key);
        }
    }
}

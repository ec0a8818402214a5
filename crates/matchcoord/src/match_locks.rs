//! Per-match async locks.
//!
//! All mutations of one match run under its lock, so operations on a single
//! match are serialized within a replica while different matches proceed in
//! parallel. Cross-replica exclusion comes from the ownership lease.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::MatchId;

struct LockEntry {
    lock: Arc<AsyncMutex<()>>,
    last_used: Instant,
}

/// Lazily created lock per match id.
#[derive(Default)]
pub struct MatchLocks {
    entries: Mutex<HashMap<MatchId, LockEntry>>,
}

impl MatchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `match_id`.
    pub async fn lock(&self, match_id: &MatchId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(match_id.clone())
                .or_insert_with(|| LockEntry {
                    lock: Arc::new(AsyncMutex::new(())),
                    last_used: Instant::now(),
                });
            entry.last_used = Instant::now();
            entry.lock.clone()
        };
        lock.lock_owned().await
    }

    /// Drop entries idle for at least `idle` that nobody holds or awaits.
    pub fn reap_idle(&self, idle: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            Arc::strong_count(&entry.lock) > 1 || entry.last_used.elapsed() < idle
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

//! Per-match coordinator leases.
//!
//! Every replica runs the same sweeps and accepts the same API calls; the lease
//! decides which one is allowed to mutate a given match. A lease is a
//! `(backend_id, heartbeat)` pair on the match row, claimed or renewed with a
//! compare-and-swap against the value the caller just read. Two replicas racing
//! on the same snapshot cannot both win.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::MatchError;
use crate::match_storage::{MatchStorage, OwnerLease};
use crate::types::{BackendId, MatchId};

/// Result of an acquire-or-renew attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    /// The match had no live owner and is now ours.
    Acquired { previous: Option<BackendId> },
    /// We already owned it; heartbeat refreshed.
    Renewed,
    /// Another replica holds a live lease.
    HeldElsewhere { owner: BackendId },
    /// The row changed between read and write; someone else got there first.
    LostRace,
}

impl LeaseDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, LeaseDecision::Acquired { .. } | LeaseDecision::Renewed)
    }
}

/// Lease registry for one replica.
pub struct MatchOwnershipRegistry {
    storage: Arc<dyn MatchStorage>,
    backend_id: BackendId,
    lease_ttl: chrono::Duration,
    held: Mutex<HashSet<MatchId>>,
}

impl MatchOwnershipRegistry {
    pub fn new(storage: Arc<dyn MatchStorage>, backend_id: BackendId, lease_ttl: Duration) -> Self {
        Self {
            storage,
            backend_id,
            lease_ttl: chrono::Duration::from_std(lease_ttl).unwrap_or(chrono::Duration::MAX),
            held: Mutex::new(HashSet::new()),
        }
    }

    pub fn backend_id(&self) -> &BackendId {
        &self.backend_id
    }

    /// Whether `lease` has gone without a heartbeat for longer than the TTL.
    pub fn is_stale(&self, lease: &OwnerLease, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(lease.heartbeat) > self.lease_ttl
    }

    /// The replica holding a live lease on `match_id`, if it is not us.
    ///
    /// Read-only; an unknown match has no owner.
    pub async fn owner_elsewhere(
        &self,
        match_id: &MatchId,
        now: DateTime<Utc>,
    ) -> Result<Option<BackendId>, MatchError> {
        let owner = self
            .storage
            .load_match(match_id)
            .await?
            .and_then(|record| record.owner);
        Ok(owner
            .filter(|lease| lease.backend_id != self.backend_id && !self.is_stale(lease, now))
            .map(|lease| lease.backend_id))
    }

    /// Claim the match if it is unowned, ours, or its owner went quiet;
    /// otherwise report who holds it.
    pub async fn acquire_or_renew(
        &self,
        match_id: &MatchId,
        now: DateTime<Utc>,
    ) -> Result<LeaseDecision, MatchError> {
        let record = self
            .storage
            .load_match(match_id)
            .await?
            .ok_or_else(|| MatchError::match_not_found(match_id))?;

        let current = record.owner;
        if let Some(lease) = &current {
            if lease.backend_id != self.backend_id && !self.is_stale(lease, now) {
                self.held.lock().remove(match_id);
                return Ok(LeaseDecision::HeldElsewhere {
                    owner: lease.backend_id.clone(),
                });
            }
        }

        let next = OwnerLease {
            backend_id: self.backend_id.clone(),
            heartbeat: now,
        };
        let swapped = self
            .storage
            .compare_and_set_owner(match_id, current.as_ref(), Some(&next))
            .await?;
        if !swapped {
            debug!(match_id = %match_id, backend = %self.backend_id, "lost lease race");
            self.held.lock().remove(match_id);
            return Ok(LeaseDecision::LostRace);
        }

        let newly_held = self.held.lock().insert(match_id.clone());
        match current {
            Some(lease) if lease.backend_id == self.backend_id => {
                if newly_held {
                    debug!(match_id = %match_id, backend = %self.backend_id, "resumed lease");
                }
                Ok(LeaseDecision::Renewed)
            }
            previous => {
                let previous = previous.map(|l| l.backend_id);
                match &previous {
                    Some(stale) => warn!(
                        match_id = %match_id,
                        backend = %self.backend_id,
                        stale_owner = %stale,
                        "took over stale lease"
                    ),
                    None => info!(match_id = %match_id, backend = %self.backend_id, "acquired lease"),
                }
                Ok(LeaseDecision::Acquired { previous })
            }
        }
    }

    /// Drop our lease on `match_id` if we still hold it.
    ///
    /// Returns `true` if a lease was cleared.
    pub async fn release(&self, match_id: &MatchId) -> Result<bool, MatchError> {
        self.held.lock().remove(match_id);
        let Some(record) = self.storage.load_match(match_id).await? else {
            return Ok(false);
        };
        match record.owner {
            Some(lease) if lease.backend_id == self.backend_id => {
                let cleared = self
                    .storage
                    .compare_and_set_owner(match_id, Some(&lease), None)
                    .await?;
                if cleared {
                    info!(match_id = %match_id, backend = %self.backend_id, "released lease");
                }
                Ok(cleared)
            }
            _ => Ok(false),
        }
    }

    /// Release every lease this replica believes it holds. Used on shutdown.
    pub async fn release_all(&self) -> usize {
        let held: Vec<MatchId> = self.held.lock().iter().cloned().collect();
        let mut released = 0;
        for match_id in held {
            match self.release(&match_id).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => warn!(match_id = %match_id, error = %e, "failed to release lease"),
            }
        }
        released
    }

    /// Matches this replica has successfully leased and not released.
    pub fn held(&self) -> Vec<MatchId> {
        self.held.lock().iter().cloned().collect()
    }
}

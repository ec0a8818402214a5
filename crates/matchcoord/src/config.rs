//! Coordinator configuration.

use std::time::Duration;

use crate::draft::ROSTER_SIZE;
use crate::error::MatchError;
use crate::types::BackendId;

/// Minimum ratio between lease TTL and heartbeat interval.
///
/// Replicas with skewed clocks must not steal each other's leases between two
/// heartbeats.
pub const MIN_LEASE_TO_HEARTBEAT_RATIO: u32 = 4;

/// Runtime settings for one coordinator replica.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Identity of this replica in ownership rows and inbox records.
    pub backend_id: BackendId,
    /// Time a player has to act on their slot before it is skipped.
    pub turn_duration: Duration,
    /// Period of the timeout sweep.
    pub sweep_interval: Duration,
    /// How often an owner is expected to renew its lease.
    pub heartbeat_interval: Duration,
    /// Age after which a heartbeat is stale and the lease can be claimed.
    pub lease_ttl: Duration,
    /// Votes for one candidate needed to link a match.
    pub vote_quorum: usize,
    /// How long admitted inbox events are retained before pruning.
    pub inbox_retention: Duration,
    /// Idle per-match locks are dropped after this long.
    pub lock_idle_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            backend_id: BackendId::new("backend-0"),
            turn_duration: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(25),
            vote_quorum: 5,
            inbox_retention: Duration::from_secs(7 * 24 * 60 * 60),
            lock_idle_ttl: Duration::from_secs(300),
        }
    }
}

impl CoordinatorConfig {
    /// Build a config from `MATCHCOORD_*` environment variables on top of defaults.
    ///
    /// Durations are given in milliseconds.
    pub fn from_env() -> Result<Self, MatchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MatchError> {
        let mut config = Self::default();
        if let Some(id) = lookup("MATCHCOORD_BACKEND_ID") {
            config.backend_id = BackendId::new(id);
        }
        let millis = |key: &str| -> Result<Option<Duration>, MatchError> {
            lookup(key)
                .map(|raw| {
                    raw.parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|e| MatchError::InvalidConfig {
                            reason: format!("{key}={raw}: {e}"),
                        })
                })
                .transpose()
        };
        if let Some(d) = millis("MATCHCOORD_TURN_DURATION_MS")? {
            config.turn_duration = d;
        }
        if let Some(d) = millis("MATCHCOORD_SWEEP_INTERVAL_MS")? {
            config.sweep_interval = d;
        }
        if let Some(d) = millis("MATCHCOORD_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = d;
        }
        if let Some(d) = millis("MATCHCOORD_LEASE_TTL_MS")? {
            config.lease_ttl = d;
        }
        if let Some(d) = millis("MATCHCOORD_INBOX_RETENTION_MS")? {
            config.inbox_retention = d;
        }
        if let Some(raw) = lookup("MATCHCOORD_VOTE_QUORUM") {
            config.vote_quorum = raw.parse().map_err(|e| MatchError::InvalidConfig {
                reason: format!("MATCHCOORD_VOTE_QUORUM={raw}: {e}"),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break liveness or lease safety.
    pub fn validate(&self) -> Result<(), MatchError> {
        let invalid = |reason: String| Err(MatchError::InvalidConfig { reason });

        if self.backend_id.as_str().is_empty() {
            return invalid("backend_id must not be empty".into());
        }
        for (name, value) in [
            ("turn_duration", self.turn_duration),
            ("sweep_interval", self.sweep_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("lease_ttl", self.lease_ttl),
        ] {
            if value.is_zero() {
                return invalid(format!("{name} must be positive"));
            }
        }
        if self.lease_ttl < self.heartbeat_interval * MIN_LEASE_TO_HEARTBEAT_RATIO {
            return invalid(format!(
                "lease_ttl {:?} must be at least {MIN_LEASE_TO_HEARTBEAT_RATIO}x heartbeat_interval {:?}",
                self.lease_ttl, self.heartbeat_interval
            ));
        }
        if self.vote_quorum == 0 || self.vote_quorum > ROSTER_SIZE {
            return invalid(format!(
                "vote_quorum {} must be between 1 and {ROSTER_SIZE}",
                self.vote_quorum
            ));
        }
        Ok(())
    }
}

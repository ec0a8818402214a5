//! Idempotent admission of inbound notifications.
//!
//! Notifications arrive at least once and may be fanned out to every replica.
//! The inbox records each event id the first time it is seen; every later
//! delivery of the same id is reported as a duplicate and must not be processed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::MatchError;
use crate::types::{BackendId, EventId, MatchId};

/// An inbound notification as recorded by the inbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboxEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub match_id: Option<MatchId>,
    /// Replica that produced the event.
    pub backend_id: BackendId,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Outcome of an admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmitResult {
    /// First sighting; the caller owns processing.
    Admitted,
    /// Already recorded; skip all processing.
    Duplicate,
}

/// Persistent record of admitted event ids.
#[async_trait]
pub trait InboxStorage: Send + Sync {
    /// Insert `event` unless its id is already present, atomically.
    async fn insert_event(
        &self,
        event: &InboxEvent,
        received_at: DateTime<Utc>,
    ) -> Result<AdmitResult, MatchError>;

    async fn contains_event(&self, event_id: &EventId) -> Result<bool, MatchError>;

    /// Delete the record for `event_id`. Returns whether one existed.
    async fn forget_event(&self, event_id: &EventId) -> Result<bool, MatchError>;

    /// Delete records received before `cutoff`. Returns how many were removed.
    async fn prune_events(&self, cutoff: DateTime<Utc>) -> Result<u64, MatchError>;
}

/// Admission front for [`InboxStorage`].
pub struct EventInbox {
    storage: Arc<dyn InboxStorage>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
}

impl EventInbox {
    pub fn new(storage: Arc<dyn InboxStorage>, clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            storage,
            clock,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Record `event` if unseen.
    pub async fn admit(&self, event: &InboxEvent) -> Result<AdmitResult, MatchError> {
        let result = self.storage.insert_event(event, self.clock.now()).await?;
        match result {
            AdmitResult::Admitted => debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "admitted event"
            ),
            AdmitResult::Duplicate => debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "dropped duplicate event"
            ),
        }
        Ok(result)
    }

    pub async fn has_seen(&self, event_id: &EventId) -> Result<bool, MatchError> {
        self.storage.contains_event(event_id).await
    }

    /// Withdraw an admission whose processing failed, so a redelivery is
    /// admitted again.
    pub async fn forget(&self, event_id: &EventId) -> Result<bool, MatchError> {
        let removed = self.storage.forget_event(event_id).await?;
        if removed {
            debug!(event_id = %event_id, "withdrew admission");
        }
        Ok(removed)
    }

    /// Forget events older than the retention window.
    ///
    /// A redelivery of a pruned id would be admitted again, so the window must
    /// exceed the longest redelivery delay of the upstream transport.
    pub async fn prune(&self) -> Result<u64, MatchError> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.storage.prune_events(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "pruned inbox events");
        }
        Ok(removed)
    }
}

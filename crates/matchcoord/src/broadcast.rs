//! Outbound state notifications to connected clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::MatchError;
use crate::types::MatchId;

/// Event names published by the coordinator.
pub mod events {
    pub const DRAFT_STARTED: &str = "draft_started";
    pub const DRAFT_UPDATED: &str = "draft_updated";
    /// Every rostered player confirmed; the match is ready for the game.
    pub const MATCH_READY: &str = "match_ready";
    pub const VOTE_UPDATED: &str = "vote_updated";
    /// Published exactly once per match.
    pub const MATCH_LINKED: &str = "match_linked";
}

/// Delivery channel to clients watching a match.
///
/// Publishing happens after state is committed. A failed publish does not
/// roll anything back; clients resync through the read operations.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(
        &self,
        match_id: &MatchId,
        event: &'static str,
        payload: serde_json::Value,
    ) -> Result<(), MatchError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn publish(
        &self,
        match_id: &MatchId,
        event: &'static str,
        _payload: serde_json::Value,
    ) -> Result<(), MatchError> {
        trace!(match_id = %match_id, event, "dropping broadcast");
        Ok(())
    }
}

/// A published notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub match_id: MatchId,
    pub event: String,
    pub payload: serde_json::Value,
}

/// In-process fan-out over a tokio broadcast channel.
///
/// Publishing with no subscribers is not an error.
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(
        &self,
        match_id: &MatchId,
        event: &'static str,
        payload: serde_json::Value,
    ) -> Result<(), MatchError> {
        let receivers = self
            .tx
            .send(BroadcastMessage {
                match_id: match_id.clone(),
                event: event.to_string(),
                payload,
            })
            .unwrap_or(0);
        trace!(match_id = %match_id, event, receivers, "broadcast");
        Ok(())
    }
}

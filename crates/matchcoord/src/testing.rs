//! Test doubles for code built on the coordinator.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

pub use crate::clock::ManualClock;

use crate::broadcast::{BroadcastMessage, Broadcaster};
use crate::error::MatchError;
use crate::game_source::GameRecordSource;
use crate::types::{GameId, MatchId, PlayerId};

/// Broadcaster that keeps every published message.
#[derive(Default)]
pub struct RecordingBroadcaster {
    messages: Mutex<Vec<BroadcastMessage>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<BroadcastMessage> {
        self.messages.lock().clone()
    }

    /// How many times `event` was published for `match_id`.
    pub fn count(&self, match_id: &MatchId, event: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| &m.match_id == match_id && m.event == event)
            .count()
    }

    pub fn last(&self, event: &str) -> Option<BroadcastMessage> {
        self.messages
            .lock()
            .iter()
            .rev()
            .find(|m| m.event == event)
            .cloned()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(
        &self,
        match_id: &MatchId,
        event: &'static str,
        payload: serde_json::Value,
    ) -> Result<(), MatchError> {
        self.messages.lock().push(BroadcastMessage {
            match_id: match_id.clone(),
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Game source answering from a fixed map.
#[derive(Default)]
pub struct StaticGameRecords {
    records: Mutex<HashMap<GameId, serde_json::Value>>,
}

impl StaticGameRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, game_id: GameId, record: serde_json::Value) {
        self.records.lock().insert(game_id, record);
    }
}

#[async_trait]
impl GameRecordSource for StaticGameRecords {
    async fn fetch_game(&self, game_id: &GameId) -> Result<Option<serde_json::Value>, MatchError> {
        Ok(self.records.lock().get(game_id).cloned())
    }
}

/// Five player ids `{prefix}1..={prefix}5`.
pub fn team(prefix: &str) -> Vec<PlayerId> {
    (1..=5).map(|i| PlayerId::new(format!("{prefix}{i}"))).collect()
}

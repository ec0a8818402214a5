use async_trait::async_trait;

use crate::error::MatchError;
use crate::types::GameId;

/// Lookup of externally observed game records, used when a match is linked.
#[async_trait]
pub trait GameRecordSource: Send + Sync {
    /// Fetch the record for `game_id`. `Ok(None)` if the source has nothing yet;
    /// the match is still linked, with null game data.
    async fn fetch_game(&self, game_id: &GameId) -> Result<Option<serde_json::Value>, MatchError>;
}

/// Source that never has data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGameRecords;

#[async_trait]
impl GameRecordSource for NoGameRecords {
    async fn fetch_game(&self, _game_id: &GameId) -> Result<Option<serde_json::Value>, MatchError> {
        Ok(None)
    }
}

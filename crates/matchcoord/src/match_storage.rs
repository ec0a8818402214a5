//! Match row persistence: status, ownership lease, linked game and draft.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::draft::DraftState;
use crate::error::MatchError;
use crate::types::{BackendId, GameId, MatchId, MatchStatus};

/// Current coordinator of a match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerLease {
    pub backend_id: BackendId,
    pub heartbeat: DateTime<Utc>,
}

/// One custom match as seen by the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub status: MatchStatus,
    pub owner: Option<OwnerLease>,
    pub linked_game_id: Option<GameId>,
    pub linked_game_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    /// A fresh lobby without owner or link.
    pub fn lobby(match_id: MatchId, created_at: DateTime<Utc>) -> Self {
        Self {
            match_id,
            status: MatchStatus::Lobby,
            owner: None,
            linked_game_id: None,
            linked_game_data: None,
            created_at,
        }
    }
}

/// Optional status change applied atomically with a draft write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChange {
    pub from: MatchStatus,
    pub to: MatchStatus,
}

/// Storage for match rows and drafts.
///
/// Every method that returns `bool` is a conditional write: `true` means the
/// condition held and the write happened, `false` means nothing was written.
/// Implementations must evaluate the condition and the write atomically.
#[async_trait]
pub trait MatchStorage: Send + Sync {
    /// Insert a match row. Returns `false` if the id already exists.
    async fn insert_match(&self, record: &MatchRecord) -> Result<bool, MatchError>;

    async fn load_match(&self, match_id: &MatchId) -> Result<Option<MatchRecord>, MatchError>;

    /// Set status to `next` if it currently equals `expected`.
    async fn compare_and_set_status(
        &self,
        match_id: &MatchId,
        expected: MatchStatus,
        next: MatchStatus,
    ) -> Result<bool, MatchError>;

    /// Replace the owner lease if the stored one equals `expected` exactly
    /// (backend id and heartbeat; `None` matches an unowned row).
    async fn compare_and_set_owner(
        &self,
        match_id: &MatchId,
        expected: Option<&OwnerLease>,
        next: Option<&OwnerLease>,
    ) -> Result<bool, MatchError>;

    /// Link the match to an external game and mark it completed, only if no
    /// game is linked yet and the status is one of `from`.
    async fn link_game(
        &self,
        match_id: &MatchId,
        game_id: &GameId,
        game_data: &serde_json::Value,
        from: &[MatchStatus],
    ) -> Result<bool, MatchError>;

    /// Store a new draft and move the match from `Lobby` to `Drafting`.
    /// Returns `false` if the match is not in the lobby or already has a draft.
    async fn begin_draft(&self, draft: &DraftState) -> Result<bool, MatchError>;

    async fn load_draft(&self, match_id: &MatchId) -> Result<Option<DraftState>, MatchError>;

    /// Overwrite a draft if its stored version equals `expected_version`,
    /// applying `status` in the same write when given.
    async fn save_draft(
        &self,
        draft: &DraftState,
        expected_version: i64,
        status: Option<StatusChange>,
    ) -> Result<bool, MatchError>;

    /// Matches in `Drafting` whose draft still has unfilled slots.
    async fn active_drafts(&self) -> Result<Vec<MatchId>, MatchError>;
}

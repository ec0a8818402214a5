use std::fmt;

use crate::types::{BackendId, MatchId};

/// Boxed source error carried by system-level variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by the coordination engine.
///
/// `NotFound`, `InvalidTransition`, `Unauthorized` and `Conflict` are expected
/// outcomes of racing clients and are safe to report back to the caller.
/// `PersistenceError` and `MalformedPayload` are system failures.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid transition for match {match_id}: {reason}")]
    InvalidTransition {
        match_id: MatchId,
        reason: TransitionReason,
    },

    #[error("unauthorized on match {match_id}: {reason}")]
    Unauthorized { match_id: MatchId, reason: AuthReason },

    #[error("conflict on match {match_id}: {reason}")]
    Conflict {
        match_id: MatchId,
        reason: ConflictReason,
    },

    #[error("persistence error: {reason}")]
    PersistenceError {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("malformed payload: {reason}")]
    MalformedPayload {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl MatchError {
    pub(crate) fn match_not_found(match_id: &MatchId) -> Self {
        MatchError::NotFound {
            entity: "match",
            id: match_id.to_string(),
        }
    }

    pub(crate) fn draft_not_found(match_id: &MatchId) -> Self {
        MatchError::NotFound {
            entity: "draft",
            id: match_id.to_string(),
        }
    }

    pub(crate) fn transition(match_id: &MatchId, reason: TransitionReason) -> Self {
        MatchError::InvalidTransition {
            match_id: match_id.clone(),
            reason,
        }
    }

    pub(crate) fn unauthorized(match_id: &MatchId, reason: AuthReason) -> Self {
        MatchError::Unauthorized {
            match_id: match_id.clone(),
            reason,
        }
    }

    pub(crate) fn conflict(match_id: &MatchId, reason: ConflictReason) -> Self {
        MatchError::Conflict {
            match_id: match_id.clone(),
            reason,
        }
    }

    /// `true` for rejections a caller can act on; `false` for system failures.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MatchError::NotFound { .. }
                | MatchError::InvalidTransition { .. }
                | MatchError::Unauthorized { .. }
                | MatchError::Conflict { .. }
        )
    }

    /// `true` when the same request may succeed on another replica or a
    /// later delivery: storage failures, lost races, and a lease held elsewhere.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MatchError::PersistenceError { .. }
                | MatchError::Conflict { .. }
                | MatchError::Unauthorized {
                    reason: AuthReason::NotOwner { .. },
                    ..
                }
        )
    }
}

/// Why a requested state transition was refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionReason {
    DraftAlreadyExists,
    InvalidRoster { reason: String },
    NotDraftable { status: String },
    WrongSlot { expected: usize, got: usize },
    DraftComplete,
    DraftIncomplete { filled: usize, total: usize },
    ChampionAlreadyUsed { champion: String },
    DraftLocked { status: String },
    VotingClosed { status: String },
    AlreadyLinked { game_id: String },
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionReason::DraftAlreadyExists => write!(f, "draft already started"),
            TransitionReason::InvalidRoster { reason } => write!(f, "invalid roster: {reason}"),
            TransitionReason::NotDraftable { status } => {
                write!(f, "match status {status} does not allow a draft")
            }
            TransitionReason::WrongSlot { expected, got } => {
                write!(f, "wrong slot index: expected {expected}, got {got}")
            }
            TransitionReason::DraftComplete => write!(f, "draft already complete"),
            TransitionReason::DraftIncomplete { filled, total } => {
                write!(f, "draft incomplete: {filled}/{total} actions filled")
            }
            TransitionReason::ChampionAlreadyUsed { champion } => {
                write!(f, "champion {champion} already used in this draft")
            }
            TransitionReason::DraftLocked { status } => {
                write!(f, "draft is locked, match status is {status}")
            }
            TransitionReason::VotingClosed { status } => {
                write!(f, "link voting is closed, match status is {status}")
            }
            TransitionReason::AlreadyLinked { game_id } => {
                write!(f, "match already linked to game {game_id}")
            }
        }
    }
}

/// Why a caller was not allowed to act.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthReason {
    NotAssignedPlayer { expected: String, got: String },
    NotRostered { player: String },
    NotOwner { owner: BackendId },
}

impl fmt::Display for AuthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthReason::NotAssignedPlayer { expected, got } => {
                write!(f, "slot belongs to {expected}, not {got}")
            }
            AuthReason::NotRostered { player } => write!(f, "player {player} is not rostered"),
            AuthReason::NotOwner { owner } => write!(f, "match is coordinated by {owner}"),
        }
    }
}

/// Which race was lost.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictReason {
    OwnershipRace,
    StaleDraftVersion { expected: i64 },
    StatusChanged,
    MatchExists,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::OwnershipRace => write!(f, "lost ownership race"),
            ConflictReason::StaleDraftVersion { expected } => {
                write!(f, "draft changed concurrently (expected version {expected})")
            }
            ConflictReason::StatusChanged => write!(f, "match status changed concurrently"),
            ConflictReason::MatchExists => write!(f, "match already exists"),
        }
    }
}

#[cfg(feature = "sql")]
impl From<sqlx::Error> for MatchError {
    fn from(e: sqlx::Error) -> Self {
        MatchError::PersistenceError {
            reason: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<serde_json::Error> for MatchError {
    fn from(e: serde_json::Error) -> Self {
        MatchError::MalformedPayload {
            reason: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

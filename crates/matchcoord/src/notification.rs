//! Typed view of inbound notification payloads.

use serde::Deserialize;

use crate::error::MatchError;
use crate::types::{ChampionId, GameId, PlayerId};

/// Event type strings understood by [`Notification::decode`].
pub mod event_types {
    pub const DRAFT_START: &str = "draft_start";
    pub const DRAFT_ACTION: &str = "draft_action";
    pub const DRAFT_CONFIRM: &str = "draft_confirm";
    pub const LINK_VOTE: &str = "link_vote";
}

/// A decoded notification, ready for dispatch to the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    DraftStart {
        team_one: Vec<PlayerId>,
        team_two: Vec<PlayerId>,
    },
    DraftAction {
        slot: usize,
        champion: ChampionId,
        player: PlayerId,
    },
    DraftConfirm {
        player: PlayerId,
    },
    LinkVote {
        player: PlayerId,
        game_id: GameId,
    },
}

#[derive(Deserialize)]
struct DraftStartPayload {
    team_one: Vec<PlayerId>,
    team_two: Vec<PlayerId>,
}

#[derive(Deserialize)]
struct DraftActionPayload {
    slot: usize,
    champion: ChampionId,
    player: PlayerId,
}

#[derive(Deserialize)]
struct PlayerPayload {
    player: PlayerId,
}

#[derive(Deserialize)]
struct LinkVotePayload {
    player: PlayerId,
    game_id: GameId,
}

impl Notification {
    /// Whether `event_type` is one [`Notification::decode`] handles.
    pub fn is_known(event_type: &str) -> bool {
        matches!(
            event_type,
            event_types::DRAFT_START
                | event_types::DRAFT_ACTION
                | event_types::DRAFT_CONFIRM
                | event_types::LINK_VOTE
        )
    }

    /// Decode `payload` according to `event_type`.
    ///
    /// Returns `Ok(None)` for event types this crate does not handle.
    pub fn decode(event_type: &str, payload: &serde_json::Value) -> Result<Option<Self>, MatchError> {
        let parse = |what: &str, e: serde_json::Error| MatchError::MalformedPayload {
            reason: format!("{what} payload: {e}"),
            source: Some(Box::new(e)),
        };
        let notification = match event_type {
            event_types::DRAFT_START => {
                let p = DraftStartPayload::deserialize(payload)
                    .map_err(|e| parse(event_type, e))?;
                Notification::DraftStart {
                    team_one: p.team_one,
                    team_two: p.team_two,
                }
            }
            event_types::DRAFT_ACTION => {
                let p = DraftActionPayload::deserialize(payload)
                    .map_err(|e| parse(event_type, e))?;
                Notification::DraftAction {
                    slot: p.slot,
                    champion: p.champion,
                    player: p.player,
                }
            }
            event_types::DRAFT_CONFIRM => {
                let p = PlayerPayload::deserialize(payload).map_err(|e| parse(event_type, e))?;
                Notification::DraftConfirm { player: p.player }
            }
            event_types::LINK_VOTE => {
                let p = LinkVotePayload::deserialize(payload).map_err(|e| parse(event_type, e))?;
                Notification::LinkVote {
                    player: p.player,
                    game_id: p.game_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(notification))
    }
}

//! Identifier newtypes and small shared enums.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a custom match.
    MatchId
);
string_id!(
    /// Identifier of a rostered player.
    PlayerId
);
string_id!(
    /// Identifier of one backend replica process.
    BackendId
);
string_id!(
    /// Identifier of an externally observed game record.
    GameId
);
string_id!(
    /// Champion identifier as used by the game client.
    ChampionId
);
string_id!(
    /// Globally unique identifier of an inbound notification.
    EventId
);

/// One side of a 5v5 custom match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    One,
    Two,
}

impl Team {
    /// Numeric team label (1 or 2) as shown to clients.
    pub fn number(self) -> u8 {
        match self {
            Team::One => 1,
            Team::Two => 2,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "team{}", self.number())
    }
}

/// Whether a draft slot bans or picks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Ban,
    Pick,
}

/// Lifecycle status of a custom match row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Roster assembled, no draft yet.
    Lobby,
    Drafting,
    /// Every rostered player confirmed the finished draft.
    ReadyForGame,
    InGame,
    /// Linked to an external game record.
    Completed,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Lobby => "lobby",
            MatchStatus::Drafting => "drafting",
            MatchStatus::ReadyForGame => "ready_for_game",
            MatchStatus::InGame => "in_game",
            MatchStatus::Completed => "completed",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "lobby" => MatchStatus::Lobby,
            "drafting" => MatchStatus::Drafting,
            "ready_for_game" => MatchStatus::ReadyForGame,
            "in_game" => MatchStatus::InGame,
            "completed" => MatchStatus::Completed,
            "cancelled" => MatchStatus::Cancelled,
            _ => return None,
        })
    }

    /// A draft may only be started from the lobby.
    pub fn is_draftable(self) -> bool {
        matches!(self, MatchStatus::Lobby)
    }

    /// Votes are accepted once the draft is locked in and before the match is closed.
    pub fn accepts_link_votes(self) -> bool {
        matches!(self, MatchStatus::ReadyForGame | MatchStatus::InGame)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Cancelled)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Link votes: rostered players nominate the external game their match became.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MatchError;
use crate::types::{GameId, MatchId, PlayerId};

/// A player's current nomination. At most one per (match, player).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub game_id: GameId,
    pub cast_at: DateTime<Utc>,
}

/// What an upsert did to the player's row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteWrite {
    Inserted,
    Changed { previous: GameId },
    /// Same candidate as before; nothing written.
    Unchanged,
}

impl VoteWrite {
    pub fn is_change(&self) -> bool {
        !matches!(self, VoteWrite::Unchanged)
    }
}

/// Vote counts per candidate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub counts: BTreeMap<GameId, usize>,
}

impl VoteTally {
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut counts = BTreeMap::new();
        for vote in votes {
            *counts.entry(vote.game_id.clone()).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn count(&self, game_id: &GameId) -> usize {
        self.counts.get(game_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Persistent per-player votes.
#[async_trait]
pub trait VoteStorage: Send + Sync {
    /// Insert or replace the player's vote for the match.
    async fn upsert_vote(&self, vote: &Vote) -> Result<VoteWrite, MatchError>;

    async fn votes_for(&self, match_id: &MatchId) -> Result<Vec<Vote>, MatchError>;

    async fn tally(&self, match_id: &MatchId) -> Result<VoteTally, MatchError> {
        Ok(VoteTally::from_votes(&self.votes_for(match_id).await?))
    }
}

/// The candidate that reached `quorum` first among the live votes.
///
/// Votes are replayed in cast order; a moved vote counts only from its latest
/// cast. Ties on timestamp are broken by player id so every replica agrees.
pub fn quorum_winner(votes: &[Vote], quorum: usize) -> Option<GameId> {
    if quorum == 0 {
        return None;
    }
    let mut ordered: Vec<&Vote> = votes.iter().collect();
    ordered.sort_by(|a, b| {
        a.cast_at
            .cmp(&b.cast_at)
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
    let mut running: HashMap<&GameId, usize> = HashMap::new();
    for vote in ordered {
        let count = running.entry(&vote.game_id).or_insert(0);
        *count += 1;
        if *count >= quorum {
            return Some(vote.game_id.clone());
        }
    }
    None
}

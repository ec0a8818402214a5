//! In-memory storage for tests and single-process deployments.
//!
//! One mutex guards all tables, so every conditional write is atomic with
//! respect to every other write.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::draft::DraftState;
use crate::error::MatchError;
use crate::inbox::{AdmitResult, InboxEvent, InboxStorage};
use crate::match_storage::{MatchRecord, MatchStorage, OwnerLease, StatusChange};
use crate::types::{EventId, GameId, MatchId, MatchStatus, PlayerId};
use crate::vote::{Vote, VoteStorage, VoteWrite};

#[derive(Default)]
struct Tables {
    matches: HashMap<MatchId, MatchRecord>,
    drafts: HashMap<MatchId, DraftState>,
    votes: HashMap<(MatchId, PlayerId), Vote>,
    inbox: HashMap<EventId, (InboxEvent, DateTime<Utc>)>,
}

#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MatchStorage for MemoryStorage {
    async fn insert_match(&self, record: &MatchRecord) -> Result<bool, MatchError> {
        let mut t = self.tables.lock();
        if t.matches.contains_key(&record.match_id) {
            return Ok(false);
        }
        t.matches.insert(record.match_id.clone(), record.clone());
        Ok(true)
    }

    async fn load_match(&self, match_id: &MatchId) -> Result<Option<MatchRecord>, MatchError> {
        Ok(self.tables.lock().matches.get(match_id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        match_id: &MatchId,
        expected: MatchStatus,
        next: MatchStatus,
    ) -> Result<bool, MatchError> {
        let mut t = self.tables.lock();
        match t.matches.get_mut(match_id) {
            Some(record) if record.status == expected => {
                record.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_set_owner(
        &self,
        match_id: &MatchId,
        expected: Option<&OwnerLease>,
        next: Option<&OwnerLease>,
    ) -> Result<bool, MatchError> {
        let mut t = self.tables.lock();
        match t.matches.get_mut(match_id) {
            Some(record) if record.owner.as_ref() == expected => {
                record.owner = next.cloned();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn link_game(
        &self,
        match_id: &MatchId,
        game_id: &GameId,
        game_data: &serde_json::Value,
        from: &[MatchStatus],
    ) -> Result<bool, MatchError> {
        let mut t = self.tables.lock();
        match t.matches.get_mut(match_id) {
            Some(record) if record.linked_game_id.is_none() && from.contains(&record.status) => {
                record.linked_game_id = Some(game_id.clone());
                record.linked_game_data = Some(game_data.clone());
                record.status = MatchStatus::Completed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn begin_draft(&self, draft: &DraftState) -> Result<bool, MatchError> {
        let mut t = self.tables.lock();
        if t.drafts.contains_key(&draft.match_id) {
            return Ok(false);
        }
        match t.matches.get_mut(&draft.match_id) {
            Some(record) if record.status == MatchStatus::Lobby => {
                record.status = MatchStatus::Drafting;
            }
            _ => return Ok(false),
        }
        t.drafts.insert(draft.match_id.clone(), draft.clone());
        Ok(true)
    }

    async fn load_draft(&self, match_id: &MatchId) -> Result<Option<DraftState>, MatchError> {
        Ok(self.tables.lock().drafts.get(match_id).cloned())
    }

    async fn save_draft(
        &self,
        draft: &DraftState,
        expected_version: i64,
        status: Option<StatusChange>,
    ) -> Result<bool, MatchError> {
        let mut t = self.tables.lock();
        let version_ok = t
            .drafts
            .get(&draft.match_id)
            .is_some_and(|stored| stored.version == expected_version);
        if !version_ok {
            return Ok(false);
        }
        if let Some(change) = status {
            match t.matches.get_mut(&draft.match_id) {
                Some(record) if record.status == change.from => record.status = change.to,
                _ => return Ok(false),
            }
        }
        t.drafts.insert(draft.match_id.clone(), draft.clone());
        Ok(true)
    }

    async fn active_drafts(&self) -> Result<Vec<MatchId>, MatchError> {
        let t = self.tables.lock();
        let mut ids: Vec<MatchId> = t
            .drafts
            .values()
            .filter(|d| !d.is_complete())
            .filter(|d| {
                t.matches
                    .get(&d.match_id)
                    .is_some_and(|m| m.status == MatchStatus::Drafting)
            })
            .map(|d| d.match_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl InboxStorage for MemoryStorage {
    async fn insert_event(
        &self,
        event: &InboxEvent,
        received_at: DateTime<Utc>,
    ) -> Result<AdmitResult, MatchError> {
        let mut t = self.tables.lock();
        if t.inbox.contains_key(&event.event_id) {
            return Ok(AdmitResult::Duplicate);
        }
        t.inbox
            .insert(event.event_id.clone(), (event.clone(), received_at));
        Ok(AdmitResult::Admitted)
    }

    async fn contains_event(&self, event_id: &EventId) -> Result<bool, MatchError> {
        Ok(self.tables.lock().inbox.contains_key(event_id))
    }

    async fn forget_event(&self, event_id: &EventId) -> Result<bool, MatchError> {
        Ok(self.tables.lock().inbox.remove(event_id).is_some())
    }

    async fn prune_events(&self, cutoff: DateTime<Utc>) -> Result<u64, MatchError> {
        let mut t = self.tables.lock();
        let before = t.inbox.len();
        t.inbox.retain(|_, (_, received_at)| *received_at >= cutoff);
        Ok((before - t.inbox.len()) as u64)
    }
}

#[async_trait]
impl VoteStorage for MemoryStorage {
    async fn upsert_vote(&self, vote: &Vote) -> Result<VoteWrite, MatchError> {
        let mut t = self.tables.lock();
        let key = (vote.match_id.clone(), vote.player_id.clone());
        match t.votes.entry(key) {
            Entry::Occupied(e) if e.get().game_id == vote.game_id => Ok(VoteWrite::Unchanged),
            Entry::Occupied(mut e) => {
                let previous = e.insert(vote.clone()).game_id;
                Ok(VoteWrite::Changed { previous })
            }
            Entry::Vacant(e) => {
                e.insert(vote.clone());
                Ok(VoteWrite::Inserted)
            }
        }
    }

    async fn votes_for(&self, match_id: &MatchId) -> Result<Vec<Vote>, MatchError> {
        let t = self.tables.lock();
        let mut votes: Vec<Vote> = t
            .votes
            .values()
            .filter(|v| &v.match_id == match_id)
            .cloned()
            .collect();
        votes.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        Ok(votes)
    }
}

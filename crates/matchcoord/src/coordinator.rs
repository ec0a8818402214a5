//! Entry points for draft and link-vote operations.
//!
//! Every mutating call follows the same shape: take the per-match lock, make
//! sure this replica holds the ownership lease, load, apply one pure
//! transition, write back conditionally, then publish. Reads skip the lock and
//! the lease.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::broadcast::{events, Broadcaster, NoopBroadcaster};
use crate::clock::{Clock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::draft::{ConfirmOutcome, DraftSnapshot, DraftState};
use crate::error::{AuthReason, ConflictReason, MatchError, TransitionReason};
use crate::game_source::{GameRecordSource, NoGameRecords};
use crate::inbox::{AdmitResult, EventInbox, InboxEvent, InboxStorage};
use crate::match_locks::MatchLocks;
use crate::match_storage::{MatchRecord, MatchStorage, StatusChange};
use crate::notification::Notification;
use crate::ownership::{LeaseDecision, MatchOwnershipRegistry};
use crate::storage::memory::MemoryStorage;
use crate::types::{ChampionId, GameId, MatchId, MatchStatus, PlayerId};
use crate::vote::{quorum_winner, Vote, VoteStorage, VoteTally, VoteWrite};

/// Statuses from which a match may be linked to a game.
const LINKABLE: [MatchStatus; 2] = [MatchStatus::ReadyForGame, MatchStatus::InGame];

/// The storage backends a coordinator runs against.
#[derive(Clone)]
pub struct CoordinatorStorage {
    pub matches: Arc<dyn MatchStorage>,
    pub inbox: Arc<dyn InboxStorage>,
    pub votes: Arc<dyn VoteStorage>,
}

impl CoordinatorStorage {
    /// All three tables in one [`MemoryStorage`].
    pub fn memory() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self {
            matches: storage.clone(),
            inbox: storage.clone(),
            votes: storage,
        }
    }

    #[cfg(feature = "sql")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::storage::sql_inbox::SqlInboxStorage;
        use crate::storage::sql_match::SqlMatchStorage;
        use crate::storage::sql_vote::SqlVoteStorage;

        Self {
            matches: Arc::new(SqlMatchStorage::new(pool.clone())),
            inbox: Arc::new(SqlInboxStorage::new(pool.clone())),
            votes: Arc::new(SqlVoteStorage::new(pool)),
        }
    }
}

/// Result of casting a vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteOutcome {
    pub write: VoteWrite,
    pub tally: VoteTally,
    /// Set when this call linked the match.
    pub linked: Option<GameId>,
}

/// What happened to an inbound notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Processed,
    Duplicate,
    /// Admitted, but of a type nothing handles.
    Ignored,
}

/// Lease upkeep counters for one heartbeat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub renewed: usize,
    /// Leases dropped because the match finished.
    pub released: usize,
    /// Leases another replica took over.
    pub lost: usize,
    pub failed: usize,
}

/// What a timeout check did to one match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped { index: usize },
    NotExpired,
    /// Another replica coordinates this match.
    NotOwner,
    /// No running draft.
    Inactive,
}

pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    storage: Option<CoordinatorStorage>,
    clock: Arc<dyn Clock>,
    broadcaster: Arc<dyn Broadcaster>,
    games: Arc<dyn GameRecordSource>,
}

impl CoordinatorBuilder {
    pub fn storage(mut self, storage: CoordinatorStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn game_source(mut self, games: Arc<dyn GameRecordSource>) -> Self {
        self.games = games;
        self
    }

    /// Validate the config and assemble the coordinator. Defaults to in-memory storage.
    pub fn build(self) -> Result<MatchCoordinator, MatchError> {
        self.config.validate()?;
        let storage = self.storage.unwrap_or_else(CoordinatorStorage::memory);
        let ownership = MatchOwnershipRegistry::new(
            storage.matches.clone(),
            self.config.backend_id.clone(),
            self.config.lease_ttl,
        );
        let inbox = EventInbox::new(
            storage.inbox.clone(),
            self.clock.clone(),
            self.config.inbox_retention,
        );
        Ok(MatchCoordinator {
            config: self.config,
            clock: self.clock,
            matches: storage.matches,
            votes: storage.votes,
            inbox,
            ownership,
            locks: MatchLocks::new(),
            broadcaster: self.broadcaster,
            games: self.games,
        })
    }
}

/// One replica's view of the match coordination engine.
pub struct MatchCoordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    matches: Arc<dyn MatchStorage>,
    votes: Arc<dyn VoteStorage>,
    inbox: EventInbox,
    ownership: MatchOwnershipRegistry,
    locks: MatchLocks,
    broadcaster: Arc<dyn Broadcaster>,
    games: Arc<dyn GameRecordSource>,
}

impl MatchCoordinator {
    pub fn builder(config: CoordinatorConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            storage: None,
            clock: Arc::new(SystemClock),
            broadcaster: Arc::new(NoopBroadcaster),
            games: Arc::new(NoGameRecords),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn ownership(&self) -> &MatchOwnershipRegistry {
        &self.ownership
    }

    pub fn inbox(&self) -> &EventInbox {
        &self.inbox
    }

    pub fn locks(&self) -> &MatchLocks {
        &self.locks
    }

    pub(crate) fn match_storage(&self) -> &Arc<dyn MatchStorage> {
        &self.matches
    }

    /// Register a new match in the lobby.
    pub async fn create_match(&self, match_id: &MatchId) -> Result<MatchRecord, MatchError> {
        let record = MatchRecord::lobby(match_id.clone(), self.clock.now());
        if !self.matches.insert_match(&record).await? {
            return Err(MatchError::conflict(match_id, ConflictReason::MatchExists));
        }
        info!(match_id = %match_id, "match created");
        Ok(record)
    }

    /// Build the draft schedule and open slot 0.
    #[instrument(skip(self, team_one, team_two), fields(backend = %self.config.backend_id))]
    pub async fn start_draft(
        &self,
        match_id: &MatchId,
        team_one: Vec<PlayerId>,
        team_two: Vec<PlayerId>,
    ) -> Result<DraftSnapshot, MatchError> {
        let guard = self.locks.lock(match_id).await;
        let now = self.clock.now();
        let record = self.ensure_owner(match_id, now).await?;

        if self.matches.load_draft(match_id).await?.is_some() {
            return Err(MatchError::transition(
                match_id,
                TransitionReason::DraftAlreadyExists,
            ));
        }
        if !record.status.is_draftable() {
            return Err(MatchError::transition(
                match_id,
                TransitionReason::NotDraftable {
                    status: record.status.to_string(),
                },
            ));
        }

        let draft = DraftState::new(
            match_id.clone(),
            team_one,
            team_two,
            now,
            self.config.turn_duration,
        )?;
        if !self.matches.begin_draft(&draft).await? {
            return Err(MatchError::conflict(match_id, ConflictReason::StatusChanged));
        }
        info!("draft started");

        let snapshot = draft.snapshot(now);
        drop(guard);
        self.publish(match_id, events::DRAFT_STARTED, &snapshot).await;
        Ok(snapshot)
    }

    /// Fill the current slot with `champion` for `player`.
    ///
    /// Rejections (wrong slot, wrong player, used champion, finished draft)
    /// leave the draft untouched.
    #[instrument(skip(self), fields(backend = %self.config.backend_id))]
    pub async fn submit_action(
        &self,
        match_id: &MatchId,
        slot: usize,
        champion: ChampionId,
        player: &PlayerId,
    ) -> Result<DraftSnapshot, MatchError> {
        let guard = self.locks.lock(match_id).await;
        let now = self.clock.now();
        let record = self.ensure_owner(match_id, now).await?;
        let mut draft = self.load_draft(match_id).await?;

        if record.status != MatchStatus::Drafting && !draft.is_complete() {
            return Err(MatchError::transition(
                match_id,
                TransitionReason::DraftLocked {
                    status: record.status.to_string(),
                },
            ));
        }

        let expected = draft.version;
        let action = draft.apply_pick(slot, champion, player, now)?;
        debug!(slot, kind = ?action.kind, team = %action.team, "action applied");
        self.save_draft(&draft, expected, None).await?;

        let snapshot = draft.snapshot(now);
        drop(guard);
        self.publish(match_id, events::DRAFT_UPDATED, &snapshot).await;
        Ok(snapshot)
    }

    /// Skip the current slot if its deadline has passed.
    ///
    /// Called by the timeout sweep; safe to call from anywhere.
    #[instrument(skip(self), fields(backend = %self.config.backend_id))]
    pub async fn skip_if_expired(&self, match_id: &MatchId) -> Result<SkipOutcome, MatchError> {
        let guard = self.locks.lock(match_id).await;
        let now = self.clock.now();
        if !self.ownership.acquire_or_renew(match_id, now).await?.is_granted() {
            return Ok(SkipOutcome::NotOwner);
        }

        let Some(record) = self.matches.load_match(match_id).await? else {
            return Ok(SkipOutcome::Inactive);
        };
        if record.status != MatchStatus::Drafting {
            return Ok(SkipOutcome::Inactive);
        }
        let Some(mut draft) = self.matches.load_draft(match_id).await? else {
            return Ok(SkipOutcome::Inactive);
        };
        if draft.is_complete() {
            return Ok(SkipOutcome::Inactive);
        }
        if !draft.is_expired(now) {
            return Ok(SkipOutcome::NotExpired);
        }

        let expected = draft.version;
        let action = draft.skip_current(now)?;
        let index = action.index;
        info!(slot = index, player = %action.player, "turn expired, slot skipped");
        self.save_draft(&draft, expected, None).await?;

        let snapshot = draft.snapshot(now);
        drop(guard);
        self.publish(match_id, events::DRAFT_UPDATED, &snapshot).await;
        Ok(SkipOutcome::Skipped { index })
    }

    /// Record `player`'s acceptance of the finished draft. The last missing
    /// confirmation moves the match to `ReadyForGame`.
    #[instrument(skip(self), fields(backend = %self.config.backend_id))]
    pub async fn confirm_draft(
        &self,
        match_id: &MatchId,
        player: &PlayerId,
    ) -> Result<DraftSnapshot, MatchError> {
        let guard = self.locks.lock(match_id).await;
        let now = self.clock.now();
        let record = self.ensure_owner(match_id, now).await?;
        let mut draft = self.load_draft(match_id).await?;

        let expected = draft.version;
        let outcome = draft.confirm(player)?;
        if outcome == ConfirmOutcome::AlreadyConfirmed {
            debug!(player = %player, "confirmation already recorded");
            return Ok(draft.snapshot(now));
        }
        if record.status != MatchStatus::Drafting {
            return Err(MatchError::transition(
                match_id,
                TransitionReason::DraftLocked {
                    status: record.status.to_string(),
                },
            ));
        }

        let event = if outcome == ConfirmOutcome::AllConfirmed {
            let change = StatusChange {
                from: MatchStatus::Drafting,
                to: MatchStatus::ReadyForGame,
            };
            self.save_draft(&draft, expected, Some(change)).await?;
            info!("all players confirmed, match ready");
            events::MATCH_READY
        } else {
            self.save_draft(&draft, expected, None).await?;
            debug!(player = %player, confirmed = draft.confirmations.len(), "confirmation recorded");
            events::DRAFT_UPDATED
        };

        let snapshot = draft.snapshot(now);
        drop(guard);
        self.publish(match_id, event, &snapshot).await;
        Ok(snapshot)
    }

    /// Current draft with derived timing.
    pub async fn get_draft_state(&self, match_id: &MatchId) -> Result<DraftSnapshot, MatchError> {
        if self.matches.load_match(match_id).await?.is_none() {
            return Err(MatchError::match_not_found(match_id));
        }
        Ok(self.load_draft(match_id).await?.snapshot(self.clock.now()))
    }

    /// Record `player`'s vote for `game_id`, linking the match if a candidate
    /// reached quorum.
    ///
    /// The external game lookup runs between two locked sections; the second
    /// one re-checks the tally and the link guard before writing.
    #[instrument(skip(self), fields(backend = %self.config.backend_id))]
    pub async fn cast_vote(
        &self,
        match_id: &MatchId,
        player: &PlayerId,
        game_id: &GameId,
    ) -> Result<VoteOutcome, MatchError> {
        let (write, tally, winner) = {
            let _guard = self.locks.lock(match_id).await;
            let now = self.clock.now();
            let record = self.ensure_owner(match_id, now).await?;

            if let Some(linked) = &record.linked_game_id {
                return Err(MatchError::transition(
                    match_id,
                    TransitionReason::AlreadyLinked {
                        game_id: linked.to_string(),
                    },
                ));
            }
            if !record.status.accepts_link_votes() {
                return Err(MatchError::transition(
                    match_id,
                    TransitionReason::VotingClosed {
                        status: record.status.to_string(),
                    },
                ));
            }
            let draft = self.load_draft(match_id).await?;
            if !draft.is_rostered(player) {
                return Err(MatchError::unauthorized(
                    match_id,
                    AuthReason::NotRostered {
                        player: player.to_string(),
                    },
                ));
            }

            let write = self
                .votes
                .upsert_vote(&Vote {
                    match_id: match_id.clone(),
                    player_id: player.clone(),
                    game_id: game_id.clone(),
                    cast_at: now,
                })
                .await?;
            let votes = self.votes.votes_for(match_id).await?;
            let tally = VoteTally::from_votes(&votes);
            (write, tally, quorum_winner(&votes, self.config.vote_quorum))
        };

        if write.is_change() {
            debug!(player = %player, game_id = %game_id, ?write, "vote recorded");
            self.publish(match_id, events::VOTE_UPDATED, &tally).await;
        }

        let linked = match winner {
            Some(winner) => self.finalize_link(match_id, &winner).await?,
            None => None,
        };
        Ok(VoteOutcome {
            write,
            tally,
            linked,
        })
    }

    /// Fetch the game record unlocked, then link under the lock if still valid.
    async fn finalize_link(
        &self,
        match_id: &MatchId,
        winner: &GameId,
    ) -> Result<Option<GameId>, MatchError> {
        let game_data = match self.games.fetch_game(winner).await {
            Ok(Some(data)) => data,
            Ok(None) => serde_json::Value::Null,
            Err(e) => {
                warn!(match_id = %match_id, game_id = %winner, error = %e, "game lookup failed, linking without data");
                serde_json::Value::Null
            }
        };

        let guard = self.locks.lock(match_id).await;
        let now = self.clock.now();
        let record = self.ensure_owner(match_id, now).await?;
        if record.linked_game_id.is_some() {
            return Ok(None);
        }
        let votes = self.votes.votes_for(match_id).await?;
        if quorum_winner(&votes, self.config.vote_quorum).as_ref() != Some(winner) {
            debug!(match_id = %match_id, game_id = %winner, "quorum shifted before link");
            return Ok(None);
        }
        if !self
            .matches
            .link_game(match_id, winner, &game_data, &LINKABLE)
            .await?
        {
            return Ok(None);
        }

        info!(match_id = %match_id, game_id = %winner, "match linked");
        drop(guard);
        self.publish(
            match_id,
            events::MATCH_LINKED,
            &serde_json::json!({ "game_id": winner, "game_data": game_data }),
        )
        .await;
        Ok(Some(winner.clone()))
    }

    /// Vote counts per candidate game.
    pub async fn get_vote_tally(&self, match_id: &MatchId) -> Result<VoteTally, MatchError> {
        if self.matches.load_match(match_id).await?.is_none() {
            return Err(MatchError::match_not_found(match_id));
        }
        self.votes.tally(match_id).await
    }

    /// Admit an inbound notification and, on first sighting, dispatch it.
    ///
    /// A replica that sees a live lease held elsewhere refuses the event
    /// without recording it. If dispatch fails with a retryable error the
    /// admission is withdrawn, so the owner or a redelivery can still apply
    /// it; state-machine rejections stay recorded.
    #[instrument(skip(self, event), fields(event_id = %event.event_id, event_type = %event.event_type))]
    pub async fn handle_event(&self, event: &InboxEvent) -> Result<EventOutcome, MatchError> {
        if Notification::is_known(&event.event_type) {
            if let Some(match_id) = &event.match_id {
                let now = self.clock.now();
                if let Some(owner) = self.ownership.owner_elsewhere(match_id, now).await? {
                    debug!(owner = %owner, "event left for the owning replica");
                    return Err(MatchError::unauthorized(
                        match_id,
                        AuthReason::NotOwner { owner },
                    ));
                }
            }
        }

        if self.inbox.admit(event).await? == AdmitResult::Duplicate {
            return Ok(EventOutcome::Duplicate);
        }
        match self.dispatch(event).await {
            Err(e) if e.is_retryable() => {
                match self.inbox.forget(&event.event_id).await {
                    Ok(_) => debug!(error = %e, "dispatch failed, admission withdrawn"),
                    Err(forget) => {
                        warn!(error = %e, forget_error = %forget, "failed to withdraw admission")
                    }
                }
                Err(e)
            }
            other => other,
        }
    }

    async fn dispatch(&self, event: &InboxEvent) -> Result<EventOutcome, MatchError> {
        let Some(notification) = Notification::decode(&event.event_type, &event.payload)? else {
            warn!("no handler for event type");
            return Ok(EventOutcome::Ignored);
        };
        let match_id = event
            .match_id
            .as_ref()
            .ok_or_else(|| MatchError::MalformedPayload {
                reason: format!("{} event without match id", event.event_type),
                source: None,
            })?;

        match notification {
            Notification::DraftStart { team_one, team_two } => {
                self.start_draft(match_id, team_one, team_two).await?;
            }
            Notification::DraftAction {
                slot,
                champion,
                player,
            } => {
                self.submit_action(match_id, slot, champion, &player).await?;
            }
            Notification::DraftConfirm { player } => {
                self.confirm_draft(match_id, &player).await?;
            }
            Notification::LinkVote { player, game_id } => {
                self.cast_vote(match_id, &player, &game_id).await?;
            }
        }
        Ok(EventOutcome::Processed)
    }

    /// Renew every lease this replica holds; leases on finished matches are
    /// released instead.
    pub async fn heartbeat(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        for match_id in self.ownership.held() {
            let now = self.clock.now();
            let result: Result<Option<LeaseDecision>, MatchError> = async {
                match self.matches.load_match(&match_id).await? {
                    Some(record) if !record.status.is_terminal() => {
                        Ok(Some(self.ownership.acquire_or_renew(&match_id, now).await?))
                    }
                    _ => self.ownership.release(&match_id).await.map(|_| None),
                }
            }
            .await;
            match result {
                Ok(Some(decision)) if decision.is_granted() => report.renewed += 1,
                Ok(Some(decision)) => {
                    report.lost += 1;
                    warn!(match_id = %match_id, ?decision, "lease lost");
                }
                Ok(None) => report.released += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(match_id = %match_id, error = %e, "heartbeat failed");
                }
            }
        }
        report
    }

    /// Release every lease this replica holds.
    pub async fn shutdown(&self) -> usize {
        let released = self.ownership.release_all().await;
        info!(backend = %self.config.backend_id, released, "coordinator released leases");
        released
    }

    async fn ensure_owner(
        &self,
        match_id: &MatchId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<MatchRecord, MatchError> {
        match self.ownership.acquire_or_renew(match_id, now).await? {
            LeaseDecision::Acquired { .. } | LeaseDecision::Renewed => {}
            LeaseDecision::HeldElsewhere { owner } => {
                return Err(MatchError::unauthorized(
                    match_id,
                    AuthReason::NotOwner { owner },
                ));
            }
            LeaseDecision::LostRace => {
                return Err(MatchError::conflict(match_id, ConflictReason::OwnershipRace));
            }
        }
        self.matches
            .load_match(match_id)
            .await?
            .ok_or_else(|| MatchError::match_not_found(match_id))
    }

    async fn load_draft(&self, match_id: &MatchId) -> Result<DraftState, MatchError> {
        self.matches
            .load_draft(match_id)
            .await?
            .ok_or_else(|| MatchError::draft_not_found(match_id))
    }

    async fn save_draft(
        &self,
        draft: &DraftState,
        expected_version: i64,
        status: Option<StatusChange>,
    ) -> Result<(), MatchError> {
        if self
            .matches
            .save_draft(draft, expected_version, status)
            .await?
        {
            return Ok(());
        }
        let stored = self.matches.load_draft(&draft.match_id).await?;
        let reason = match stored {
            Some(d) if d.version == expected_version => ConflictReason::StatusChanged,
            _ => ConflictReason::StaleDraftVersion {
                expected: expected_version,
            },
        };
        warn!(match_id = %draft.match_id, %reason, "draft write rejected");
        Err(MatchError::conflict(&draft.match_id, reason))
    }

    /// Publish after commit, outside the match lock. Failures are logged;
    /// state is already durable.
    async fn publish<T: Serialize>(&self, match_id: &MatchId, event: &'static str, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(match_id = %match_id, event, error = %e, "failed to encode broadcast");
                return;
            }
        };
        if let Err(e) = self.broadcaster.publish(match_id, event, payload).await {
            warn!(match_id = %match_id, event, error = %e, "broadcast failed");
        }
    }
}

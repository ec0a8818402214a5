//! Ban/pick draft state machine.
//!
//! A draft is a fixed table of [`DRAFT_SCHEDULE`] slots. Slots are filled strictly in
//! order by the player the schedule assigns to them; an expired slot is filled with
//! [`SlotFill::Skipped`]. Once every slot is filled, the ten rostered players confirm
//! the result.
//!
//! This module is pure: it never touches storage, locks or the clock. The
//! coordinator loads a [`DraftState`], applies one transition and saves it back.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthReason, MatchError, TransitionReason};
use crate::types::{ActionKind, ChampionId, MatchId, PlayerId, Team};

/// Players per team.
pub const TEAM_SIZE: usize = 5;

/// Players per match.
pub const ROSTER_SIZE: usize = TEAM_SIZE * 2;

/// Tournament draft order: three bans each, three picks each (1-2-2-1), two bans
/// each, then the last two picks each.
pub const DRAFT_SCHEDULE: [(Team, ActionKind); 20] = {
    use ActionKind::{Ban, Pick};
    use Team::{One, Two};
    [
        (One, Ban),
        (Two, Ban),
        (One, Ban),
        (Two, Ban),
        (One, Ban),
        (Two, Ban),
        (One, Pick),
        (Two, Pick),
        (Two, Pick),
        (One, Pick),
        (One, Pick),
        (Two, Pick),
        (Two, Ban),
        (One, Ban),
        (Two, Ban),
        (One, Ban),
        (Two, Pick),
        (One, Pick),
        (One, Pick),
        (Two, Pick),
    ]
};

/// Number of slots in a draft.
pub const ACTION_COUNT: usize = DRAFT_SCHEDULE.len();

/// Content of one draft slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "champion", rename_all = "snake_case")]
pub enum SlotFill {
    Pending,
    Champion(ChampionId),
    /// The assigned player let the turn expire.
    Skipped,
}

impl SlotFill {
    pub fn is_filled(&self) -> bool {
        !matches!(self, SlotFill::Pending)
    }

    pub fn champion(&self) -> Option<&ChampionId> {
        match self {
            SlotFill::Champion(c) => Some(c),
            _ => None,
        }
    }
}

/// One scheduled ban or pick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftAction {
    pub index: usize,
    pub team: Team,
    pub player: PlayerId,
    pub kind: ActionKind,
    pub fill: SlotFill,
    pub acted_at: Option<DateTime<Utc>>,
}

/// Where a draft is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftPhase {
    Drafting,
    AwaitingConfirmation,
    Confirmed,
}

/// Persistent draft of one match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftState {
    pub match_id: MatchId,
    pub team_one: Vec<PlayerId>,
    pub team_two: Vec<PlayerId>,
    pub actions: Vec<DraftAction>,
    pub current_index: usize,
    pub last_action_started_at: DateTime<Utc>,
    pub turn_duration_ms: u64,
    pub confirmations: BTreeSet<PlayerId>,
    /// Bumped on every mutation; storage writes are conditional on it.
    pub version: i64,
}

/// Result of a confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Recorded { confirmed: usize },
    /// This confirmation was the last one missing.
    AllConfirmed,
    AlreadyConfirmed,
}

impl DraftState {
    /// Build the slot table for a fresh draft.
    pub fn new(
        match_id: MatchId,
        team_one: Vec<PlayerId>,
        team_two: Vec<PlayerId>,
        now: DateTime<Utc>,
        turn_duration: Duration,
    ) -> Result<Self, MatchError> {
        validate_roster(&match_id, &team_one, &team_two)?;

        let mut bans = [0usize; 2];
        let mut picks = [0usize; 2];
        let actions = DRAFT_SCHEDULE
            .iter()
            .enumerate()
            .map(|(index, &(team, kind))| {
                let (roster, side) = match team {
                    Team::One => (&team_one, 0),
                    Team::Two => (&team_two, 1),
                };
                let counter = match kind {
                    ActionKind::Ban => &mut bans[side],
                    ActionKind::Pick => &mut picks[side],
                };
                let player = roster[*counter % TEAM_SIZE].clone();
                *counter += 1;
                DraftAction {
                    index,
                    team,
                    player,
                    kind,
                    fill: SlotFill::Pending,
                    acted_at: None,
                }
            })
            .collect();

        Ok(Self {
            match_id,
            team_one,
            team_two,
            actions,
            current_index: 0,
            last_action_started_at: now,
            turn_duration_ms: u64::try_from(turn_duration.as_millis()).unwrap_or(u64::MAX),
            confirmations: BTreeSet::new(),
            version: 0,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.actions.len()
    }

    pub fn phase(&self) -> DraftPhase {
        if !self.is_complete() {
            DraftPhase::Drafting
        } else if self.all_confirmed() {
            DraftPhase::Confirmed
        } else {
            DraftPhase::AwaitingConfirmation
        }
    }

    pub fn all_confirmed(&self) -> bool {
        self.confirmations.len() == self.team_one.len() + self.team_two.len()
    }

    pub fn current_action(&self) -> Option<&DraftAction> {
        self.actions.get(self.current_index)
    }

    pub fn is_rostered(&self, player: &PlayerId) -> bool {
        self.team_one.contains(player) || self.team_two.contains(player)
    }

    pub fn turn_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.turn_duration_ms).unwrap_or(i64::MAX))
    }

    /// Deadline of the slot currently up, `None` once the draft is complete.
    pub fn current_deadline(&self) -> Option<DateTime<Utc>> {
        self.current_action()?;
        self.last_action_started_at
            .checked_add_signed(self.turn_duration())
    }

    /// Whether the current slot's deadline has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.current_deadline()
            .is_some_and(|deadline| now > deadline)
    }

    /// Fill `slot` with `champion` on behalf of `actor`.
    pub fn apply_pick(
        &mut self,
        slot: usize,
        champion: ChampionId,
        actor: &PlayerId,
        now: DateTime<Utc>,
    ) -> Result<&DraftAction, MatchError> {
        self.check_turn(slot, actor)?;
        if self.champion_used(&champion) {
            return Err(MatchError::transition(
                &self.match_id,
                TransitionReason::ChampionAlreadyUsed {
                    champion: champion.to_string(),
                },
            ));
        }
        Ok(self.fill_current(SlotFill::Champion(champion), now))
    }

    /// Skip the current slot for its assigned player.
    pub fn skip_current(&mut self, now: DateTime<Utc>) -> Result<&DraftAction, MatchError> {
        let action = self.current_action().ok_or_else(|| {
            MatchError::transition(&self.match_id, TransitionReason::DraftComplete)
        })?;
        let (slot, actor) = (action.index, action.player.clone());
        self.check_turn(slot, &actor)?;
        Ok(self.fill_current(SlotFill::Skipped, now))
    }

    /// Record that `player` accepts the finished draft.
    pub fn confirm(&mut self, player: &PlayerId) -> Result<ConfirmOutcome, MatchError> {
        if !self.is_complete() {
            return Err(MatchError::transition(
                &self.match_id,
                TransitionReason::DraftIncomplete {
                    filled: self.current_index,
                    total: self.actions.len(),
                },
            ));
        }
        if !self.is_rostered(player) {
            return Err(MatchError::unauthorized(
                &self.match_id,
                AuthReason::NotRostered {
                    player: player.to_string(),
                },
            ));
        }
        if !self.confirmations.insert(player.clone()) {
            return Ok(ConfirmOutcome::AlreadyConfirmed);
        }
        self.version += 1;
        if self.all_confirmed() {
            Ok(ConfirmOutcome::AllConfirmed)
        } else {
            Ok(ConfirmOutcome::Recorded {
                confirmed: self.confirmations.len(),
            })
        }
    }

    /// Read-only view with derived timing fields.
    pub fn snapshot(&self, now: DateTime<Utc>) -> DraftSnapshot {
        let deadline = self.current_deadline();
        DraftSnapshot {
            phase: self.phase(),
            deadline,
            remaining_ms: deadline.map(|d| (d - now).num_milliseconds().max(0)),
            state: self.clone(),
        }
    }

    fn check_turn(&self, slot: usize, actor: &PlayerId) -> Result<(), MatchError> {
        let Some(action) = self.current_action() else {
            return Err(MatchError::transition(
                &self.match_id,
                TransitionReason::DraftComplete,
            ));
        };
        if slot != self.current_index {
            return Err(MatchError::transition(
                &self.match_id,
                TransitionReason::WrongSlot {
                    expected: self.current_index,
                    got: slot,
                },
            ));
        }
        if &action.player != actor {
            return Err(MatchError::unauthorized(
                &self.match_id,
                AuthReason::NotAssignedPlayer {
                    expected: action.player.to_string(),
                    got: actor.to_string(),
                },
            ));
        }
        Ok(())
    }

    fn champion_used(&self, champion: &ChampionId) -> bool {
        self.actions[..self.current_index]
            .iter()
            .any(|a| a.fill.champion() == Some(champion))
    }

    fn fill_current(&mut self, fill: SlotFill, now: DateTime<Utc>) -> &DraftAction {
        let index = self.current_index;
        self.current_index += 1;
        self.last_action_started_at = now;
        self.version += 1;
        let action = &mut self.actions[index];
        action.fill = fill;
        action.acted_at = Some(now);
        action
    }
}

/// Draft state plus derived timing, as published to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub phase: DraftPhase,
    pub deadline: Option<DateTime<Utc>>,
    pub remaining_ms: Option<i64>,
    #[serde(flatten)]
    pub state: DraftState,
}

fn validate_roster(
    match_id: &MatchId,
    team_one: &[PlayerId],
    team_two: &[PlayerId],
) -> Result<(), MatchError> {
    let invalid = |reason: String| {
        MatchError::transition(match_id, TransitionReason::InvalidRoster { reason })
    };
    if team_one.len() != TEAM_SIZE || team_two.len() != TEAM_SIZE {
        return Err(invalid(format!(
            "expected {TEAM_SIZE} players per team, got {} and {}",
            team_one.len(),
            team_two.len()
        )));
    }
    let mut seen = HashSet::with_capacity(ROSTER_SIZE);
    for player in team_one.iter().chain(team_two) {
        if !seen.insert(player) {
            return Err(invalid(format!("player {player} rostered twice")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(prefix: &str) -> Vec<PlayerId> {
        (1..=5).map(|i| PlayerId::new(format!("{prefix}{i}"))).collect()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn new_draft() -> DraftState {
        DraftState::new(
            MatchId::new("m1"),
            roster("A"),
            roster("B"),
            t0(),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    fn fill_all(draft: &mut DraftState) {
        for i in 0..ACTION_COUNT {
            let actor = draft.current_action().unwrap().player.clone();
            draft
                .apply_pick(i, ChampionId::new(format!("champ{i}")), &actor, t0())
                .unwrap();
        }
    }

    #[test]
    fn schedule_has_ten_bans_and_ten_picks() {
        let bans = DRAFT_SCHEDULE
            .iter()
            .filter(|(_, k)| *k == ActionKind::Ban)
            .count();
        assert_eq!(bans, 10);
        assert_eq!(ACTION_COUNT, 20);
        for team in [Team::One, Team::Two] {
            assert_eq!(DRAFT_SCHEDULE.iter().filter(|(t, _)| *t == team).count(), 10);
        }
    }

    #[test]
    fn every_player_bans_once_and_picks_once() {
        let draft = new_draft();
        for player in draft.team_one.iter().chain(&draft.team_two) {
            let mine: Vec<_> = draft.actions.iter().filter(|a| &a.player == player).collect();
            assert_eq!(mine.len(), 2, "{player}");
            assert!(mine.iter().any(|a| a.kind == ActionKind::Ban));
            assert!(mine.iter().any(|a| a.kind == ActionKind::Pick));
        }
    }

    #[test]
    fn wrong_player_is_rejected_without_mutation() {
        let mut draft = new_draft();
        let before = draft.clone();
        let err = draft
            .apply_pick(0, ChampionId::new("ahri"), &PlayerId::new("B1"), t0())
            .unwrap_err();
        assert!(matches!(err, MatchError::Unauthorized { .. }));
        assert_eq!(draft, before);
        assert_eq!(draft.current_index, 0);
    }

    #[test]
    fn stale_slot_is_rejected() {
        let mut draft = new_draft();
        draft
            .apply_pick(0, ChampionId::new("ahri"), &PlayerId::new("A1"), t0())
            .unwrap();
        let err = draft
            .apply_pick(0, ChampionId::new("zed"), &PlayerId::new("A1"), t0())
            .unwrap_err();
        assert!(matches!(
            err,
            MatchError::InvalidTransition {
                reason: TransitionReason::WrongSlot {
                    expected: 1,
                    got: 0
                },
                ..
            }
        ));
        assert_eq!(draft.actions[0].fill, SlotFill::Champion(ChampionId::new("ahri")));
    }

    #[test]
    fn duplicate_champion_is_rejected() {
        let mut draft = new_draft();
        draft
            .apply_pick(0, ChampionId::new("ahri"), &PlayerId::new("A1"), t0())
            .unwrap();
        let err = draft
            .apply_pick(1, ChampionId::new("ahri"), &PlayerId::new("B1"), t0())
            .unwrap_err();
        assert!(matches!(
            err,
            MatchError::InvalidTransition {
                reason: TransitionReason::ChampionAlreadyUsed { .. },
                ..
            }
        ));
        assert_eq!(draft.current_index, 1);
    }

    #[test]
    fn skip_fills_with_sentinel_and_resets_turn() {
        let mut draft = new_draft();
        let later = t0() + chrono::Duration::seconds(31);
        assert!(draft.is_expired(later));
        let action = draft.skip_current(later).unwrap();
        assert_eq!(action.fill, SlotFill::Skipped);
        assert_eq!(draft.current_index, 1);
        assert_eq!(draft.last_action_started_at, later);
        assert!(!draft.is_expired(later));
    }

    #[test]
    fn skipped_slots_do_not_block_champions() {
        let mut draft = new_draft();
        draft.skip_current(t0()).unwrap();
        draft
            .apply_pick(1, ChampionId::new("ahri"), &PlayerId::new("B1"), t0())
            .unwrap();
        assert_eq!(draft.current_index, 2);
    }

    #[test]
    fn confirm_requires_complete_draft() {
        let mut draft = new_draft();
        let err = draft.confirm(&PlayerId::new("A1")).unwrap_err();
        assert!(matches!(
            err,
            MatchError::InvalidTransition {
                reason: TransitionReason::DraftIncomplete { filled: 0, total: 20 },
                ..
            }
        ));
    }

    #[test]
    fn ten_confirmations_complete_the_draft() {
        let mut draft = new_draft();
        fill_all(&mut draft);
        assert!(draft.is_complete());
        assert_eq!(draft.phase(), DraftPhase::AwaitingConfirmation);
        assert_eq!(draft.current_deadline(), None);

        let players: Vec<_> = draft.team_one.iter().chain(&draft.team_two).cloned().collect();
        for (i, p) in players.iter().enumerate() {
            let outcome = draft.confirm(p).unwrap();
            if i + 1 == ROSTER_SIZE {
                assert_eq!(outcome, ConfirmOutcome::AllConfirmed);
            } else {
                assert_eq!(outcome, ConfirmOutcome::Recorded { confirmed: i + 1 });
            }
        }
        assert_eq!(draft.phase(), DraftPhase::Confirmed);
        assert_eq!(
            draft.confirm(&players[0]).unwrap(),
            ConfirmOutcome::AlreadyConfirmed
        );
    }

    #[test]
    fn outsider_cannot_confirm() {
        let mut draft = new_draft();
        fill_all(&mut draft);
        let err = draft.confirm(&PlayerId::new("C1")).unwrap_err();
        assert!(matches!(err, MatchError::Unauthorized { .. }));
    }

    #[test]
    fn actions_after_completion_fail() {
        let mut draft = new_draft();
        fill_all(&mut draft);
        let err = draft.skip_current(t0()).unwrap_err();
        assert!(matches!(
            err,
            MatchError::InvalidTransition {
                reason: TransitionReason::DraftComplete,
                ..
            }
        ));
    }

    #[test]
    fn roster_must_be_five_distinct_per_side() {
        let err = DraftState::new(
            MatchId::new("m"),
            roster("A")[..4].to_vec(),
            roster("B"),
            t0(),
            Duration::from_secs(30),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::InvalidTransition { .. }));

        let mut dup = roster("B");
        dup[4] = PlayerId::new("A1");
        let result = DraftState::new(
            MatchId::new("m"),
            roster("A"),
            dup,
            t0(),
            Duration::from_secs(30),
        );
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_reports_remaining_time() {
        let draft = new_draft();
        let snap = draft.snapshot(t0() + chrono::Duration::seconds(10));
        assert_eq!(snap.phase, DraftPhase::Drafting);
        assert_eq!(snap.remaining_ms, Some(20_000));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["current_index"], 0);
        assert_eq!(json["actions"][0]["fill"]["state"], "pending");
    }
}

//! Integration tests for the PostgreSQL storage backends using testcontainers.
//!
//! These tests spin up a real PostgreSQL container and exercise:
//! - `SqlMatchStorage`: match rows, owner compare-and-set, draft versioning, link guard
//! - `SqlInboxStorage`: first/duplicate admission, concurrent admission, pruning
//! - `SqlVoteStorage`: per-player upsert and grouped tally
//! - A full coordinator flow from lobby to linked match
//!
//! Run: `cargo test -p matchcoord --test sql_integration`
//!
//! Requires Docker to be running.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use matchcoord::broadcast::events;
use matchcoord::clock::ManualClock;
use matchcoord::config::CoordinatorConfig;
use matchcoord::coordinator::{CoordinatorStorage, MatchCoordinator};
use matchcoord::draft::{DraftState, ACTION_COUNT};
use matchcoord::inbox::{AdmitResult, InboxEvent, InboxStorage};
use matchcoord::match_storage::{MatchRecord, MatchStorage, OwnerLease, StatusChange};
use matchcoord::storage::sql_inbox::SqlInboxStorage;
use matchcoord::storage::sql_match::SqlMatchStorage;
use matchcoord::storage::sql_vote::SqlVoteStorage;
use matchcoord::testing::{team, RecordingBroadcaster};
use matchcoord::timeout_monitor::TimeoutMonitor;
use matchcoord::types::{BackendId, ChampionId, EventId, GameId, MatchId, MatchStatus, PlayerId};
use matchcoord::vote::{Vote, VoteStorage, VoteWrite};

use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

// ============================================================================
// Shared test infrastructure
// ============================================================================

/// Start a Postgres container and return a connected `PgPool` with migrations applied.
async fn setup_postgres() -> (testcontainers::ContainerAsync<Postgres>, sqlx::PgPool) {
    let container = Postgres::default()
        .start()
        .await
        .expect("failed to start postgres container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get port");

    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
    let pool = sqlx::PgPool::connect(&url)
        .await
        .expect("failed to connect to postgres");

    matchcoord::storage::migrate(&pool)
        .await
        .expect("migration failed");

    (container, pool)
}

/// Whole seconds, so values survive the microsecond precision of `timestamptz`.
fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_780_000_000 + secs, 0).unwrap()
}

fn lease(backend: &str, secs: i64) -> OwnerLease {
    OwnerLease {
        backend_id: BackendId::new(backend),
        heartbeat: at(secs),
    }
}

fn new_draft(id: &MatchId) -> DraftState {
    DraftState::new(
        id.clone(),
        team("A"),
        team("B"),
        at(0),
        Duration::from_secs(30),
    )
    .unwrap()
}

async fn lobby(storage: &SqlMatchStorage, id: &str) -> MatchId {
    let id = MatchId::new(id);
    assert!(storage
        .insert_match(&MatchRecord::lobby(id.clone(), at(0)))
        .await
        .unwrap());
    id
}

// ============================================================================
// SqlMatchStorage tests
// ============================================================================

mod match_storage {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let (_container, pool) = setup_postgres().await;
        SqlMatchStorage::new(pool.clone()).migrate().await.unwrap();
        SqlVoteStorage::new(pool).migrate().await.unwrap();
    }

    #[tokio::test]
    async fn insert_and_load_roundtrip() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlMatchStorage::new(pool);
        let id = lobby(&storage, "m1").await;

        let loaded = storage.load_match(&id).await.unwrap().unwrap();
        assert_eq!(loaded, MatchRecord::lobby(id.clone(), at(0)));

        // Second insert with the same id is refused.
        assert!(!storage
            .insert_match(&MatchRecord::lobby(id, at(5)))
            .await
            .unwrap());
        assert!(storage
            .load_match(&MatchId::new("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn owner_cas_requires_expected_value() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlMatchStorage::new(pool);
        let id = lobby(&storage, "m1").await;

        let a = lease("a", 0);
        assert!(storage
            .compare_and_set_owner(&id, None, Some(&a))
            .await
            .unwrap());
        // Caller still thinks the row is unowned.
        assert!(!storage
            .compare_and_set_owner(&id, None, Some(&lease("b", 0)))
            .await
            .unwrap());
        // Right backend, stale heartbeat.
        assert!(!storage
            .compare_and_set_owner(&id, Some(&lease("a", 1)), Some(&lease("a", 2)))
            .await
            .unwrap());

        let renewed = lease("a", 5);
        assert!(storage
            .compare_and_set_owner(&id, Some(&a), Some(&renewed))
            .await
            .unwrap());
        assert_eq!(
            storage.load_match(&id).await.unwrap().unwrap().owner,
            Some(renewed.clone())
        );

        assert!(storage
            .compare_and_set_owner(&id, Some(&renewed), None)
            .await
            .unwrap());
        assert!(storage.load_match(&id).await.unwrap().unwrap().owner.is_none());
    }

    #[tokio::test]
    async fn concurrent_owner_cas_has_one_winner() {
        let (_container, pool) = setup_postgres().await;
        let storage = Arc::new(SqlMatchStorage::new(pool));
        let id = lobby(&storage, "m1").await;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let (storage, id) = (storage.clone(), id.clone());
                tokio::spawn(async move {
                    storage
                        .compare_and_set_owner(&id, None, Some(&lease(&format!("r{i}"), 0)))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn begin_draft_moves_lobby_to_drafting() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlMatchStorage::new(pool);
        let id = lobby(&storage, "m1").await;

        let draft = new_draft(&id);
        assert!(storage.begin_draft(&draft).await.unwrap());
        assert!(!storage.begin_draft(&draft).await.unwrap());

        assert_eq!(
            storage.load_match(&id).await.unwrap().unwrap().status,
            MatchStatus::Drafting
        );
        assert_eq!(storage.load_draft(&id).await.unwrap(), Some(draft));
        assert_eq!(storage.active_drafts().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn begin_draft_outside_lobby_writes_nothing() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlMatchStorage::new(pool);
        let id = lobby(&storage, "m1").await;
        storage
            .compare_and_set_status(&id, MatchStatus::Lobby, MatchStatus::Cancelled)
            .await
            .unwrap();

        assert!(!storage.begin_draft(&new_draft(&id)).await.unwrap());
        assert!(storage.load_draft(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_draft_is_version_checked() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlMatchStorage::new(pool);
        let id = lobby(&storage, "m1").await;
        let mut draft = new_draft(&id);
        storage.begin_draft(&draft).await.unwrap();

        draft.skip_current(at(31)).unwrap();
        assert!(storage.save_draft(&draft, 0, None).await.unwrap());
        assert!(!storage.save_draft(&draft, 0, None).await.unwrap());

        let stored = storage.load_draft(&id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.current_index, 1);
    }

    #[tokio::test]
    async fn failed_status_change_rolls_back_draft_write() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlMatchStorage::new(pool);
        let id = lobby(&storage, "m1").await;
        let mut draft = new_draft(&id);
        storage.begin_draft(&draft).await.unwrap();

        draft.skip_current(at(31)).unwrap();
        let change = StatusChange {
            from: MatchStatus::ReadyForGame,
            to: MatchStatus::InGame,
        };
        assert!(!storage.save_draft(&draft, 0, Some(change)).await.unwrap());
        assert_eq!(storage.load_draft(&id).await.unwrap().unwrap().version, 0);

        let change = StatusChange {
            from: MatchStatus::Drafting,
            to: MatchStatus::Cancelled,
        };
        assert!(storage.save_draft(&draft, 0, Some(change)).await.unwrap());
        assert_eq!(
            storage.load_match(&id).await.unwrap().unwrap().status,
            MatchStatus::Cancelled
        );
        assert!(storage.active_drafts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn link_game_is_guarded() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlMatchStorage::new(pool);
        let id = lobby(&storage, "m1").await;
        let linkable = [MatchStatus::ReadyForGame, MatchStatus::InGame];

        // Lobby is not linkable.
        assert!(!storage
            .link_game(&id, &GameId::new("g1"), &json!({}), &linkable)
            .await
            .unwrap());

        storage
            .compare_and_set_status(&id, MatchStatus::Lobby, MatchStatus::InGame)
            .await
            .unwrap();
        let data = json!({ "duration": 1900, "winner": 2 });
        assert!(storage
            .link_game(&id, &GameId::new("g1"), &data, &linkable)
            .await
            .unwrap());
        assert!(!storage
            .link_game(&id, &GameId::new("g2"), &json!({}), &linkable)
            .await
            .unwrap());

        let record = storage.load_match(&id).await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.linked_game_id, Some(GameId::new("g1")));
        assert_eq!(record.linked_game_data, Some(data));
    }
}

// ============================================================================
// SqlInboxStorage tests
// ============================================================================

mod inbox_storage {
    use super::*;

    fn event(id: &str) -> InboxEvent {
        InboxEvent {
            event_id: EventId::new(id),
            event_type: "link_vote".into(),
            match_id: Some(MatchId::new("m1")),
            backend_id: BackendId::new("gateway"),
            payload: json!({ "player": "A1", "game_id": "g1" }),
            occurred_at: at(0),
        }
    }

    #[tokio::test]
    async fn second_insert_is_duplicate() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlInboxStorage::new(pool);

        assert_eq!(
            storage.insert_event(&event("e1"), at(1)).await.unwrap(),
            AdmitResult::Admitted
        );
        assert_eq!(
            storage.insert_event(&event("e1"), at(2)).await.unwrap(),
            AdmitResult::Duplicate
        );
        assert!(storage.contains_event(&EventId::new("e1")).await.unwrap());
        assert!(!storage.contains_event(&EventId::new("e2")).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_inserts_admit_once() {
        let (_container, pool) = setup_postgres().await;
        let storage = Arc::new(SqlInboxStorage::new(pool));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.insert_event(&event("same"), at(0)).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() == AdmitResult::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn prune_removes_old_records() {
        let (_container, pool) = setup_postgres().await;
        let storage = SqlInboxStorage::new(pool);
        storage.insert_event(&event("old"), at(0)).await.unwrap();
        storage.insert_event(&event("new"), at(100)).await.unwrap();

        assert_eq!(storage.prune_events(at(50)).await.unwrap(), 1);
        assert!(!storage.contains_event(&EventId::new("old")).await.unwrap());
        assert!(storage.contains_event(&EventId::new("new")).await.unwrap());
    }
}

// ============================================================================
// SqlVoteStorage tests
// ============================================================================

mod vote_storage {
    use super::*;

    fn vote(player: &str, game: &str, secs: i64) -> Vote {
        Vote {
            match_id: MatchId::new("m1"),
            player_id: PlayerId::new(player),
            game_id: GameId::new(game),
            cast_at: at(secs),
        }
    }

    #[tokio::test]
    async fn upsert_tracks_changes() {
        let (_container, pool) = setup_postgres().await;
        lobby(&SqlMatchStorage::new(pool.clone()), "m1").await;
        let storage = SqlVoteStorage::new(pool);

        assert_eq!(
            storage.upsert_vote(&vote("A1", "g1", 0)).await.unwrap(),
            VoteWrite::Inserted
        );
        assert_eq!(
            storage.upsert_vote(&vote("A1", "g1", 1)).await.unwrap(),
            VoteWrite::Unchanged
        );
        assert_eq!(
            storage.upsert_vote(&vote("A1", "g2", 2)).await.unwrap(),
            VoteWrite::Changed {
                previous: GameId::new("g1")
            }
        );

        let votes = storage.votes_for(&MatchId::new("m1")).await.unwrap();
        assert_eq!(votes, vec![vote("A1", "g2", 2)]);
    }

    #[tokio::test]
    async fn concurrent_first_votes_insert_once() {
        let (_container, pool) = setup_postgres().await;
        lobby(&SqlMatchStorage::new(pool.clone()), "m1").await;
        let storage = Arc::new(SqlVoteStorage::new(pool));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                let game = if i % 2 == 0 { "g1" } else { "g2" };
                tokio::spawn(async move { storage.upsert_vote(&vote("A1", game, i)).await.unwrap() })
            })
            .collect();

        let mut inserted = 0;
        for h in handles {
            if h.await.unwrap() == VoteWrite::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(storage.votes_for(&MatchId::new("m1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tally_groups_by_candidate() {
        let (_container, pool) = setup_postgres().await;
        lobby(&SqlMatchStorage::new(pool.clone()), "m1").await;
        let storage = SqlVoteStorage::new(pool);

        for (player, game) in [("A1", "g1"), ("A2", "g1"), ("B1", "g2"), ("B2", "g1")] {
            storage.upsert_vote(&vote(player, game, 0)).await.unwrap();
        }
        let tally = storage.tally(&MatchId::new("m1")).await.unwrap();
        assert_eq!(tally.count(&GameId::new("g1")), 3);
        assert_eq!(tally.count(&GameId::new("g2")), 1);
        assert_eq!(tally.total(), 4);
    }
}

// ============================================================================
// Coordinator over PostgreSQL
// ============================================================================

mod coordinator {
    use super::*;

    fn replica(
        pool: &sqlx::PgPool,
        clock: &Arc<ManualClock>,
        backend: &str,
    ) -> (Arc<MatchCoordinator>, Arc<RecordingBroadcaster>) {
        let broadcasts = Arc::new(RecordingBroadcaster::new());
        let config = CoordinatorConfig {
            backend_id: BackendId::new(backend),
            ..Default::default()
        };
        let coordinator = MatchCoordinator::builder(config)
            .storage(CoordinatorStorage::postgres(pool.clone()))
            .clock(clock.clone())
            .broadcaster(broadcasts.clone())
            .build()
            .unwrap();
        (Arc::new(coordinator), broadcasts)
    }

    #[tokio::test]
    async fn lobby_to_linked() {
        let (_container, pool) = setup_postgres().await;
        let clock = Arc::new(ManualClock::new(at(0)));
        let (a, broadcasts) = replica(&pool, &clock, "a");
        let (b, _) = replica(&pool, &clock, "b");

        let id = MatchId::new("m1");
        a.create_match(&id).await.unwrap();
        a.start_draft(&id, team("A"), team("B")).await.unwrap();

        // First slot times out; the rest are played.
        clock.advance(Duration::from_secs(31));
        let report = TimeoutMonitor::new(a.clone()).sweep().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(TimeoutMonitor::new(b.clone()).sweep().await.unwrap().not_owner, 1);

        for i in 1..ACTION_COUNT {
            let snap = a.get_draft_state(&id).await.unwrap();
            let player = snap.state.current_action().unwrap().player.clone();
            a.submit_action(&id, i, ChampionId::new(format!("c{i}")), &player)
                .await
                .unwrap();
        }
        for player in team("A").into_iter().chain(team("B")) {
            a.confirm_draft(&id, &player).await.unwrap();
        }
        assert_eq!(broadcasts.count(&id, events::MATCH_READY), 1);

        for player in team("B") {
            a.cast_vote(&id, &player, &GameId::new("g7")).await.unwrap();
        }
        assert_eq!(broadcasts.count(&id, events::MATCH_LINKED), 1);

        let record = SqlMatchStorage::new(pool.clone())
            .load_match(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.linked_game_id, Some(GameId::new("g7")));

        assert_eq!(a.shutdown().await, 1);
        let record = SqlMatchStorage::new(pool).load_match(&id).await.unwrap().unwrap();
        assert!(record.owner.is_none());
    }
}

//! Benchmarks for the draft state machine, quorum evaluation and a full
//! in-memory coordinator draft.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use matchcoord::draft::{DraftState, ACTION_COUNT};
use matchcoord::prelude::*;
use matchcoord::testing::team;
use matchcoord::vote::{quorum_winner, Vote};

fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_780_000_000, 0).unwrap()
}

fn bench_draft_state(c: &mut Criterion) {
    c.bench_function("draft_state/fill_all_slots", |b| {
        b.iter(|| {
            let mut draft = DraftState::new(
                MatchId::new("bench"),
                team("A"),
                team("B"),
                t0(),
                Duration::from_secs(30),
            )
            .unwrap();
            for slot in 0..ACTION_COUNT {
                let actor = draft.current_action().unwrap().player.clone();
                draft
                    .apply_pick(slot, ChampionId::new(format!("c{slot}")), &actor, t0())
                    .unwrap();
            }
            draft
        })
    });
}

fn bench_quorum_winner(c: &mut Criterion) {
    let mut group = c.benchmark_group("quorum_winner");

    for candidates in [1usize, 3, 10] {
        let votes: Vec<Vote> = (0..10)
            .map(|i| Vote {
                match_id: MatchId::new("bench"),
                player_id: PlayerId::new(format!("p{i}")),
                game_id: GameId::new(format!("g{}", i % candidates)),
                cast_at: t0() + chrono::Duration::seconds(i as i64),
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::new("ten_votes", candidates),
            &votes,
            |b, votes| b.iter(|| quorum_winner(votes, 5)),
        );
    }

    group.finish();
}

fn bench_coordinator_draft(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = Arc::new(
        MatchCoordinator::builder(CoordinatorConfig::default())
            .build()
            .unwrap(),
    );
    let next = AtomicU64::new(0);

    c.bench_function("coordinator/draft_to_ready", |b| {
        b.to_async(&rt).iter(|| {
            let coordinator = coordinator.clone();
            let id = MatchId::new(format!("m{}", next.fetch_add(1, Ordering::Relaxed)));
            async move {
                coordinator.create_match(&id).await.unwrap();
                coordinator
                    .start_draft(&id, team("A"), team("B"))
                    .await
                    .unwrap();
                for slot in 0..ACTION_COUNT {
                    let snapshot = coordinator.get_draft_state(&id).await.unwrap();
                    let actor = snapshot.state.current_action().unwrap().player.clone();
                    coordinator
                        .submit_action(&id, slot, ChampionId::new(format!("c{slot}")), &actor)
                        .await
                        .unwrap();
                }
                for player in team("A").into_iter().chain(team("B")) {
                    coordinator.confirm_draft(&id, &player).await.unwrap();
                }
            }
        })
    });
}

criterion_group!(
    benches,
    bench_draft_state,
    bench_quorum_winner,
    bench_coordinator_draft
);
criterion_main!(benches);

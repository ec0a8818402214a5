//! PostgreSQL-backed [`VoteStorage`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::MatchError;
use crate::types::{GameId, MatchId, PlayerId};
use crate::vote::{Vote, VoteStorage, VoteTally, VoteWrite};

#[derive(Clone)]
pub struct SqlVoteStorage {
    pool: PgPool,
}

impl SqlVoteStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), MatchError> {
        super::migrate(&self.pool).await
    }
}

#[async_trait]
impl VoteStorage for SqlVoteStorage {
    async fn upsert_vote(&self, vote: &Vote) -> Result<VoteWrite, MatchError> {
        let mut tx = self.pool.begin().await?;

        // A concurrent first vote for the same player blocks here until the
        // other insert commits, then falls through to the update path.
        let inserted = sqlx::query(
            r#"
            INSERT INTO match_votes (match_id, player_id, game_id, cast_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (match_id, player_id) DO NOTHING
            RETURNING player_id
            "#,
        )
        .bind(vote.match_id.as_str())
        .bind(vote.player_id.as_str())
        .bind(vote.game_id.as_str())
        .bind(vote.cast_at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_some() {
            tx.commit().await?;
            return Ok(VoteWrite::Inserted);
        }

        let (previous,): (String,) = sqlx::query_as(
            "SELECT game_id FROM match_votes WHERE match_id = $1 AND player_id = $2 FOR UPDATE",
        )
        .bind(vote.match_id.as_str())
        .bind(vote.player_id.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if previous == vote.game_id.as_str() {
            tx.rollback().await?;
            return Ok(VoteWrite::Unchanged);
        }

        sqlx::query(
            r#"
            UPDATE match_votes
            SET game_id = $3, cast_at = $4
            WHERE match_id = $1 AND player_id = $2
            "#,
        )
        .bind(vote.match_id.as_str())
        .bind(vote.player_id.as_str())
        .bind(vote.game_id.as_str())
        .bind(vote.cast_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(VoteWrite::Changed {
            previous: GameId::new(previous),
        })
    }

    async fn votes_for(&self, match_id: &MatchId) -> Result<Vec<Vote>, MatchError> {
        let rows: Vec<(String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT player_id, game_id, cast_at
            FROM match_votes
            WHERE match_id = $1
            ORDER BY player_id
            "#,
        )
        .bind(match_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(player_id, game_id, cast_at)| Vote {
                match_id: match_id.clone(),
                player_id: PlayerId::new(player_id),
                game_id: GameId::new(game_id),
                cast_at,
            })
            .collect())
    }

    async fn tally(&self, match_id: &MatchId) -> Result<VoteTally, MatchError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT game_id, COUNT(*) FROM match_votes WHERE match_id = $1 GROUP BY game_id",
        )
        .bind(match_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(VoteTally {
            counts: rows
                .into_iter()
                .map(|(game_id, n)| (GameId::new(game_id), n.max(0) as usize))
                .collect(),
        })
    }
}

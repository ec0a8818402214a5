//! PostgreSQL-backed [`MatchStorage`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::draft::DraftState;
use crate::error::MatchError;
use crate::match_storage::{MatchRecord, MatchStorage, OwnerLease, StatusChange};
use crate::types::{BackendId, GameId, MatchId, MatchStatus};

/// Match rows in `matches`, drafts in `match_drafts` as JSONB.
#[derive(Clone)]
pub struct SqlMatchStorage {
    pool: PgPool,
}

impl SqlMatchStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), MatchError> {
        super::migrate(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    match_id: String,
    status: String,
    owner_backend_id: Option<String>,
    owner_heartbeat: Option<DateTime<Utc>>,
    linked_game_id: Option<String>,
    linked_game_data: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MatchRow> for MatchRecord {
    type Error = MatchError;

    fn try_from(row: MatchRow) -> Result<Self, MatchError> {
        let status = MatchStatus::parse(&row.status).ok_or_else(|| MatchError::MalformedPayload {
            reason: format!("match {} has unknown status {:?}", row.match_id, row.status),
            source: None,
        })?;
        let owner = match (row.owner_backend_id, row.owner_heartbeat) {
            (Some(backend_id), Some(heartbeat)) => Some(OwnerLease {
                backend_id: BackendId::new(backend_id),
                heartbeat,
            }),
            _ => None,
        };
        Ok(MatchRecord {
            match_id: MatchId::new(row.match_id),
            status,
            owner,
            linked_game_id: row.linked_game_id.map(GameId::new),
            linked_game_data: row.linked_game_data,
            created_at: row.created_at,
        })
    }
}

fn lease_columns(lease: Option<&OwnerLease>) -> (Option<&str>, Option<DateTime<Utc>>) {
    match lease {
        Some(l) => (Some(l.backend_id.as_str()), Some(l.heartbeat)),
        None => (None, None),
    }
}

#[async_trait]
impl MatchStorage for SqlMatchStorage {
    async fn insert_match(&self, record: &MatchRecord) -> Result<bool, MatchError> {
        let (owner, heartbeat) = lease_columns(record.owner.as_ref());
        let result = sqlx::query(
            r#"
            INSERT INTO matches
                (match_id, status, owner_backend_id, owner_heartbeat,
                 linked_game_id, linked_game_data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (match_id) DO NOTHING
            "#,
        )
        .bind(record.match_id.as_str())
        .bind(record.status.as_str())
        .bind(owner)
        .bind(heartbeat)
        .bind(record.linked_game_id.as_ref().map(GameId::as_str))
        .bind(&record.linked_game_data)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_match(&self, match_id: &MatchId) -> Result<Option<MatchRecord>, MatchError> {
        let row: Option<MatchRow> = sqlx::query_as(
            r#"
            SELECT match_id, status, owner_backend_id, owner_heartbeat,
                   linked_game_id, linked_game_data, created_at
            FROM matches
            WHERE match_id = $1
            "#,
        )
        .bind(match_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(MatchRecord::try_from).transpose()
    }

    async fn compare_and_set_status(
        &self,
        match_id: &MatchId,
        expected: MatchStatus,
        next: MatchStatus,
    ) -> Result<bool, MatchError> {
        let result = sqlx::query(
            "UPDATE matches SET status = $3, updated_at = now() WHERE match_id = $1 AND status = $2",
        )
        .bind(match_id.as_str())
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set_owner(
        &self,
        match_id: &MatchId,
        expected: Option<&OwnerLease>,
        next: Option<&OwnerLease>,
    ) -> Result<bool, MatchError> {
        let (exp_owner, exp_heartbeat) = lease_columns(expected);
        let (next_owner, next_heartbeat) = lease_columns(next);
        let result = sqlx::query(
            r#"
            UPDATE matches
            SET owner_backend_id = $2, owner_heartbeat = $3, updated_at = now()
            WHERE match_id = $1
              AND owner_backend_id IS NOT DISTINCT FROM $4
              AND owner_heartbeat IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(match_id.as_str())
        .bind(next_owner)
        .bind(next_heartbeat)
        .bind(exp_owner)
        .bind(exp_heartbeat)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn link_game(
        &self,
        match_id: &MatchId,
        game_id: &GameId,
        game_data: &serde_json::Value,
        from: &[MatchStatus],
    ) -> Result<bool, MatchError> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE matches
            SET linked_game_id = $2, linked_game_data = $3, status = $4, updated_at = now()
            WHERE match_id = $1
              AND linked_game_id IS NULL
              AND status = ANY($5)
            "#,
        )
        .bind(match_id.as_str())
        .bind(game_id.as_str())
        .bind(game_data)
        .bind(MatchStatus::Completed.as_str())
        .bind(&from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn begin_draft(&self, draft: &DraftState) -> Result<bool, MatchError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            "UPDATE matches SET status = $3, updated_at = now() WHERE match_id = $1 AND status = $2",
        )
        .bind(draft.match_id.as_str())
        .bind(MatchStatus::Lobby.as_str())
        .bind(MatchStatus::Drafting.as_str())
        .execute(&mut *tx)
        .await?;
        if moved.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO match_drafts (match_id, state, version, current_index, action_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (match_id) DO NOTHING
            "#,
        )
        .bind(draft.match_id.as_str())
        .bind(Json(draft))
        .bind(draft.version)
        .bind(draft.current_index as i32)
        .bind(draft.actions.len() as i32)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn load_draft(&self, match_id: &MatchId) -> Result<Option<DraftState>, MatchError> {
        let row: Option<(Json<DraftState>,)> =
            sqlx::query_as("SELECT state FROM match_drafts WHERE match_id = $1")
                .bind(match_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(state),)| state))
    }

    async fn save_draft(
        &self,
        draft: &DraftState,
        expected_version: i64,
        status: Option<StatusChange>,
    ) -> Result<bool, MatchError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE match_drafts
            SET state = $2, version = $3, current_index = $4, updated_at = now()
            WHERE match_id = $1 AND version = $5
            "#,
        )
        .bind(draft.match_id.as_str())
        .bind(Json(draft))
        .bind(draft.version)
        .bind(draft.current_index as i32)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(change) = status {
            let moved = sqlx::query(
                "UPDATE matches SET status = $3, updated_at = now() WHERE match_id = $1 AND status = $2",
            )
            .bind(draft.match_id.as_str())
            .bind(change.from.as_str())
            .bind(change.to.as_str())
            .execute(&mut *tx)
            .await?;
            if moved.rows_affected() != 1 {
                tx.rollback().await?;
                return Ok(false);
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn active_drafts(&self) -> Result<Vec<MatchId>, MatchError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT d.match_id
            FROM match_drafts d
            JOIN matches m ON m.match_id = d.match_id
            WHERE m.status = $1 AND d.current_index < d.action_count
            ORDER BY d.match_id
            "#,
        )
        .bind(MatchStatus::Drafting.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| MatchId::new(id)).collect())
    }
}

//! PostgreSQL-backed [`InboxStorage`].
//!
//! Admission relies on the primary key of `inbox_events`: the first
//! `INSERT ... ON CONFLICT DO NOTHING` for an id affects one row, every later
//! one affects none, whichever replica issues it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::MatchError;
use crate::inbox::{AdmitResult, InboxEvent, InboxStorage};
use crate::types::{EventId, MatchId};

#[derive(Clone)]
pub struct SqlInboxStorage {
    pool: PgPool,
}

impl SqlInboxStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), MatchError> {
        super::migrate(&self.pool).await
    }
}

#[async_trait]
impl InboxStorage for SqlInboxStorage {
    async fn insert_event(
        &self,
        event: &InboxEvent,
        received_at: DateTime<Utc>,
    ) -> Result<AdmitResult, MatchError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbox_events
                (event_id, event_type, match_id, backend_id, payload, occurred_at, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id.as_str())
        .bind(&event.event_type)
        .bind(event.match_id.as_ref().map(MatchId::as_str))
        .bind(event.backend_id.as_str())
        .bind(&event.payload)
        .bind(event.occurred_at)
        .bind(received_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            AdmitResult::Admitted
        } else {
            AdmitResult::Duplicate
        })
    }

    async fn contains_event(&self, event_id: &EventId) -> Result<bool, MatchError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM inbox_events WHERE event_id = $1)")
                .bind(event_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn forget_event(&self, event_id: &EventId) -> Result<bool, MatchError> {
        let result = sqlx::query("DELETE FROM inbox_events WHERE event_id = $1")
            .bind(event_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn prune_events(&self, cutoff: DateTime<Utc>) -> Result<u64, MatchError> {
        let result = sqlx::query("DELETE FROM inbox_events WHERE received_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub mod memory;

#[cfg(feature = "sql")]
pub mod sql_inbox;
#[cfg(feature = "sql")]
pub mod sql_match;
#[cfg(feature = "sql")]
pub mod sql_vote;

/// Schema shared by every SQL backend.
#[cfg(feature = "sql")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply all pending migrations to `pool`.
#[cfg(feature = "sql")]
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), crate::error::MatchError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| crate::error::MatchError::PersistenceError {
            reason: format!("migration failed: {e}"),
            source: Some(Box::new(e)),
        })
}

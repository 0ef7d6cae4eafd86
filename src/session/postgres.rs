use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use sonic_rs::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_postgres::Row;

use super::{ExpirationPolicy, Result, Session, SessionError, SessionStore};
use crate::models::session::SessionRecord;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        data TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        last_activity_at TIMESTAMPTZ NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions (created_at);
    CREATE INDEX IF NOT EXISTS idx_sessions_last_activity_at ON sessions (last_activity_at);
"#;

const GET_BY_ID: &str = r#"
    SELECT id, data, created_at, last_activity_at
    FROM sessions
    WHERE id = $1
"#;

const UPSERT: &str = r#"
    INSERT INTO sessions (id, data, created_at, last_activity_at)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (id) DO UPDATE
    SET data = EXCLUDED.data, last_activity_at = EXCLUDED.last_activity_at
"#;

const DELETE_BY_ID: &str = r#"
    DELETE FROM sessions
    WHERE id = $1
"#;

const DELETE_EXPIRED: &str = r#"
    DELETE FROM sessions
    WHERE last_activity_at < $1 OR created_at < $2
"#;

/// A session store backed by PostgreSQL.
///
/// Each session is one row of the `sessions` table; the data map is
/// serialized to a JSON text blob. There is no in-process locking: the
/// upsert and the bulk delete rely on the database's row-level guarantees,
/// and concurrent writes to the same id are last-writer-wins.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: Pool,
}

impl PostgresSessionStore {
    /// Creates a new `PostgresSessionStore`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the `sessions` table and its indexes if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(CREATE_TABLE).await?;
        tracing::info!("✅ Sessions table ready");
        Ok(())
    }
}

impl std::fmt::Debug for PostgresSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSessionStore").finish_non_exhaustive()
    }
}

/// Keeps a GC cutoff inside PostgreSQL's `timestamptz` range.
///
/// Very long expirations saturate to `DateTime::MIN_UTC`, which the server
/// rejects. No session predates the epoch, so clamping there deletes nothing
/// extra.
fn storable_cutoff(cutoff: DateTime<Utc>) -> DateTime<Utc> {
    cutoff.max(DateTime::UNIX_EPOCH)
}

/// A helper function to map a `tokio_postgres::Row` to a `SessionRecord`.
fn row_to_record(row: &Row) -> Result<SessionRecord> {
    let id: String = row
        .try_get("id")
        .map_err(|_| SessionError::Corrupt("id".to_string()))?;
    let data: String = row
        .try_get("data")
        .map_err(|_| SessionError::Corrupt("data".to_string()))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|_| SessionError::Corrupt("created_at".to_string()))?;
    let last_activity_at: DateTime<Utc> = row
        .try_get("last_activity_at")
        .map_err(|_| SessionError::Corrupt("last_activity_at".to_string()))?;

    let data: HashMap<String, Value> = sonic_rs::from_str(&data)?;

    Ok(SessionRecord {
        id,
        data,
        created_at,
        last_activity_at,
    })
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[tracing::instrument(name = "Load session record", level = "debug", skip_all)]
    async fn read(&self, id: &str) -> Result<Option<Session>> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(GET_BY_ID).await?;
        let row = client.query_opt(&statement, &[&id]).await?;

        row.map(|r| row_to_record(&r).map(Session::from_record))
            .transpose()
    }

    #[tracing::instrument(name = "Upsert session record", level = "debug", skip_all)]
    async fn write(&self, session: &Session) -> Result<()> {
        let record = session.record();
        let data = sonic_rs::to_string(&record.data)?;

        let client = self.pool.get().await?;
        let statement = client.prepare_cached(UPSERT).await?;
        let affected = client
            .execute(
                &statement,
                &[&record.id, &data, &record.created_at, &record.last_activity_at],
            )
            .await?;

        tracing::debug!("Session upsert affected {} rows", affected);
        Ok(())
    }

    #[tracing::instrument(name = "Delete session record", level = "debug", skip_all)]
    async fn destroy(&self, id: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(DELETE_BY_ID).await?;
        client.execute(&statement, &[&id]).await?;
        Ok(())
    }

    #[tracing::instrument(name = "Delete expired session records", level = "debug", skip_all)]
    async fn gc(&self, idle_expiration: Duration, absolute_expiration: Duration) -> Result<u64> {
        let policy = ExpirationPolicy::new(idle_expiration, absolute_expiration);
        let now = Utc::now();
        let idle_threshold = storable_cutoff(policy.idle_cutoff(now));
        let absolute_threshold = storable_cutoff(policy.absolute_cutoff(now));

        let client = self.pool.get().await?;
        let statement = client.prepare_cached(DELETE_EXPIRED).await?;
        let removed = client
            .execute(&statement, &[&idle_threshold, &absolute_threshold])
            .await?;

        Ok(removed)
    }
}

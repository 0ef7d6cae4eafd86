use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ExpirationPolicy, Result, Session, SessionStore};
use crate::models::session::SessionRecord;

/// An in-memory session store.
///
/// Sessions are lost on restart and not shared across processes. A single
/// lock guards the whole map, which is fine for development, tests and
/// embedded single-process deployments.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl InMemorySessionStore {
    /// Creates a new, empty `InMemorySessionStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no record.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn read(&self, id: &str) -> Result<Option<Session>> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned().map(Session::from_record))
    }

    async fn write(&self, session: &Session) -> Result<()> {
        let record = session.record();
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(id);
        Ok(())
    }

    async fn gc(&self, idle_expiration: Duration, absolute_expiration: Duration) -> Result<u64> {
        let policy = ExpirationPolicy::new(idle_expiration, absolute_expiration);
        let now = Utc::now();

        let mut records = self.records.write().await;
        let initial_len = records.len();
        records.retain(|_, record| {
            !policy.is_expired_at(record.created_at, record.last_activity_at, now)
        });
        Ok((initial_len - records.len()) as u64)
    }
}

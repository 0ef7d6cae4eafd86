use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::Script;
use redis::aio::ConnectionManager;
use std::sync::LazyLock;
use std::time::Duration;

use super::{ExpirationPolicy, Result, Session, SessionStore};
use crate::models::session::SessionRecord;

/// Prefix of the key holding a session's JSON payload.
const KEY_PREFIX: &str = "session:";
/// Sorted set of session ids scored by last activity (unix millis).
const ACTIVITY_INDEX: &str = "sessions:by_activity";
/// Sorted set of session ids scored by creation time (unix millis).
const CREATED_INDEX: &str = "sessions:by_created";

// KEYS[1] activity index, KEYS[2] creation index,
// ARGV[1] idle cutoff, ARGV[2] absolute cutoff, ARGV[3] key prefix.
static GC_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local idle = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
        local old = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', '(' .. ARGV[2])
        local seen = {}
        local removed = 0
        for _, ids in ipairs({idle, old}) do
            for _, id in ipairs(ids) do
                if not seen[id] then
                    seen[id] = true
                    redis.call('DEL', ARGV[3] .. id)
                    redis.call('ZREM', KEYS[1], id)
                    redis.call('ZREM', KEYS[2], id)
                    removed = removed + 1
                end
            end
        end
        return removed
        "#,
    )
});

fn session_key(id: &str) -> String {
    format!("{}{}", KEY_PREFIX, id)
}

/// A session store backed by Redis.
///
/// Each session is a JSON string under `session:{id}`. Two sorted sets index
/// the ids by last activity and by creation time, so a GC sweep is a single
/// server-side script instead of a scan over every key.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
}

impl RedisSessionStore {
    /// Creates a new `RedisSessionStore`.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[tracing::instrument(name = "Load session record", level = "debug", skip_all)]
    async fn read(&self, id: &str) -> Result<Option<Session>> {
        let mut redis = self.redis.clone();
        let payload: Option<String> = redis.get(session_key(id)).await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let record: SessionRecord = sonic_rs::from_str(&payload)?;
        Ok(Some(Session::from_record(record)))
    }

    #[tracing::instrument(name = "Upsert session record", level = "debug", skip_all)]
    async fn write(&self, session: &Session) -> Result<()> {
        let record = session.record();
        let payload = sonic_rs::to_string(&record)?;

        let mut redis = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(session_key(&record.id), payload)
            .ignore()
            .zadd(ACTIVITY_INDEX, &record.id, record.last_activity_at.timestamp_millis())
            .ignore()
            .zadd(CREATED_INDEX, &record.id, record.created_at.timestamp_millis())
            .ignore()
            .query_async(&mut redis)
            .await?;

        Ok(())
    }

    #[tracing::instrument(name = "Delete session record", level = "debug", skip_all)]
    async fn destroy(&self, id: &str) -> Result<()> {
        let mut redis = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(session_key(id))
            .ignore()
            .zrem(ACTIVITY_INDEX, id)
            .ignore()
            .zrem(CREATED_INDEX, id)
            .ignore()
            .query_async(&mut redis)
            .await?;

        Ok(())
    }

    #[tracing::instrument(name = "Delete expired session records", level = "debug", skip_all)]
    async fn gc(&self, idle_expiration: Duration, absolute_expiration: Duration) -> Result<u64> {
        let policy = ExpirationPolicy::new(idle_expiration, absolute_expiration);
        let now = Utc::now();

        let mut invocation = GC_SCRIPT.prepare_invoke();
        invocation
            .key(ACTIVITY_INDEX)
            .key(CREATED_INDEX)
            .arg(policy.idle_cutoff(now).timestamp_millis())
            .arg(policy.absolute_cutoff(now).timestamp_millis())
            .arg(KEY_PREFIX);

        let mut redis = self.redis.clone();
        let removed: u64 = invocation.invoke_async(&mut redis).await?;

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        assert_eq!(session_key("abc"), "session:abc");
    }
}

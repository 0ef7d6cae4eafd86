use async_trait::async_trait;
use std::time::Duration;

use super::{Result, Session};

/// The interface of a session storage backend.
///
/// Backends share no code; each one only has to satisfy these four
/// operations. All of them must be safe to call concurrently on the same
/// instance.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the session stored under `id`.
    ///
    /// A missing record is `Ok(None)`, not an error.
    async fn read(&self, id: &str) -> Result<Option<Session>>;

    /// Creates or replaces the record for the session's current id.
    ///
    /// The id, data and both timestamps are captured in one snapshot taken
    /// under the session's read lock.
    async fn write(&self, session: &Session) -> Result<()>;

    /// Removes the record stored under `id`.
    ///
    /// Destroying a missing record succeeds: the manager may evict a session
    /// that the background sweep already removed.
    async fn destroy(&self, id: &str) -> Result<()>;

    /// Removes every record idle for longer than `idle_expiration` or older
    /// than `absolute_expiration`.
    ///
    /// # Returns
    ///
    /// The number of records removed.
    async fn gc(&self, idle_expiration: Duration, absolute_expiration: Duration) -> Result<u64>;
}

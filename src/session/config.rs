use std::time::Duration;

use super::policy::ExpirationPolicy;

/// Name of the session cookie unless configured otherwise.
pub const DEFAULT_COOKIE_NAME: &str = "session_id";

/// Settings of a [`SessionManager`](super::SessionManager).
///
/// Immutable once the manager has been built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session id.
    pub cookie_name: String,
    /// How often the background sweep purges expired records.
    pub gc_interval: Duration,
    /// Maximum time since the last recorded activity.
    pub idle_expiration: Duration,
    /// Maximum time since the session was created.
    pub absolute_expiration: Duration,
    /// Whether the cookie carries the `Secure` attribute.
    ///
    /// The session id is a bearer credential: keep this on for every
    /// deployment served over HTTPS.
    pub cookie_secure: bool,
    /// Upper bound for a single call into the store.
    pub store_timeout: Duration,
}

impl SessionConfig {
    /// The expiration policy described by this configuration.
    pub fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::new(self.idle_expiration, self.absolute_expiration)
    }

    /// The `Max-Age` of the session cookie, in seconds.
    pub fn cookie_max_age_secs(&self) -> i64 {
        i64::try_from(self.idle_expiration.as_secs()).unwrap_or(i64::MAX)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            gc_interval: Duration::from_secs(30 * 60),
            idle_expiration: Duration::from_secs(60 * 60),
            absolute_expiration: Duration::from_secs(12 * 60 * 60),
            cookie_secure: true,
            store_timeout: Duration::from_secs(5),
        }
    }
}

//! Cookie-backed, server-side sessions.
//!
//! A [`SessionManager`] loads the session named by the request cookie from a
//! [`SessionStore`], hands it to the handler through the request extensions,
//! persists it once the handler is done and emits the session cookie exactly
//! once per response. Expired records are purged eagerly on access and by a
//! periodic background sweep.

mod config;
mod error;
mod handle;
mod manager;
mod memory;
mod middleware;
mod policy;
mod postgres;
mod redis;
mod store;

pub use self::config::{DEFAULT_COOKIE_NAME, SessionConfig};
pub use self::error::{Result, SessionError};
pub use self::handle::Session;
pub use self::manager::SessionManager;
pub use self::memory::InMemorySessionStore;
pub use self::middleware::{CookieWriter, get_session, handle};
pub use self::policy::ExpirationPolicy;
pub use self::postgres::PostgresSessionStore;
pub use self::redis::RedisSessionStore;
pub use self::store::SessionStore;

use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;

/// The number of random bytes in a session id.
const SESSION_ID_SIZE: usize = 32;

/// Generates a new random session id.
///
/// # Returns
///
/// A URL-safe base64-encoded string carrying 256 bits of entropy.
pub fn generate_session_id() -> String {
    let mut id = [0u8; SESSION_ID_SIZE];
    OsRng.fill_bytes(&mut id);

    general_purpose::URL_SAFE_NO_PAD.encode(id)
}

/// Shortens a session id for log output.
pub(crate) fn redact(id: &str) -> String {
    let prefix: String = id.chars().take(8).collect();
    format!("{prefix}...")
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sonic_rs::Value;
use std::collections::HashMap;

/// The persisted form of a session.
///
/// Every store writes and reads this 4-tuple keyed by `id`. The `data` map is
/// stored as an opaque JSON blob; callers decide what goes in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The session id, also the cookie value.
    pub id: String,
    /// The key/value pairs attached to the session.
    pub data: HashMap<String, Value>,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp of the last persisted write.
    pub last_activity_at: DateTime<Utc>,
}

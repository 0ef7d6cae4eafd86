use chrono::{DateTime, Utc};
use sonic_rs::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, MutexGuard};

use super::generate_session_id;
use crate::models::session::SessionRecord;

/// A server-side session attached to a single request.
///
/// `Session` is a cheap handle: clones share the same state. All access to
/// the id, the data map and the timestamps goes through an internal
/// read/write lock, so the handle can be used from any task.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<State>,
    // Serializes id rotations; held across the store call.
    rotation: Mutex<()>,
}

struct State {
    id: String,
    data: HashMap<String, Value>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Creates a fresh, empty session with a new random id.
    pub fn new() -> Self {
        let now = Utc::now();
        Self::from_state(State {
            id: generate_session_id(),
            data: HashMap::new(),
            created_at: now,
            last_activity_at: now,
        })
    }

    /// Rebuilds a session from its persisted form.
    pub fn from_record(record: SessionRecord) -> Self {
        Self::from_state(State {
            id: record.id,
            data: record.data,
            created_at: record.created_at,
            last_activity_at: record.last_activity_at,
        })
    }

    fn from_state(state: State) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                rotation: Mutex::new(()),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current session id.
    pub fn id(&self) -> String {
        self.read().id.clone()
    }

    /// When the session was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.read().created_at
    }

    /// When the session was last persisted.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.read().last_activity_at
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().data.get(key).cloned()
    }

    /// Whether a value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.read().data.contains_key(key)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().data.insert(key.into(), value.into());
    }

    /// Removes `key`. Removing a missing key is a no-op.
    pub fn delete(&self, key: &str) {
        self.write().data.remove(key);
    }

    /// A consistent copy of the session, taken under its read lock.
    pub fn record(&self) -> SessionRecord {
        let state = self.read();
        SessionRecord {
            id: state.id.clone(),
            data: state.data.clone(),
            created_at: state.created_at,
            last_activity_at: state.last_activity_at,
        }
    }

    pub(crate) fn touch(&self, now: DateTime<Utc>) {
        self.write().last_activity_at = now;
    }

    pub(crate) fn set_id(&self, id: String) {
        self.write().id = id;
    }

    pub(crate) async fn lock_rotation(&self) -> MutexGuard<'_, ()> {
        self.inner.rotation.lock().await
    }

    /// Whether both handles point at the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Session")
            .field("id", &super::redact(&state.id))
            .field("keys", &state.data.keys().collect::<Vec<_>>())
            .field("created_at", &state.created_at)
            .field("last_activity_at", &state.last_activity_at)
            .finish()
    }
}

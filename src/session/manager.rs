use axum::http::{HeaderMap, Request, header::COOKIE};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tower_cookies::cookie::Cookie;

use super::{Result, Session, SessionConfig, SessionError, SessionStore, generate_session_id, redact};

/// Loads, validates, persists and rotates sessions.
///
/// Cloning is cheap; all clones share the store, the configuration and the
/// background GC task. The task stops on [`shutdown`](Self::shutdown) or
/// when the last clone is dropped.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl SessionManager {
    /// Creates a new `SessionManager` and starts its GC sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S>(store: S, config: SessionConfig) -> Self
    where
        S: SessionStore + 'static,
    {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Same as [`new`](Self::new), for a store that is already shared.
    pub fn with_shared_store(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        let shutdown = CancellationToken::new();

        if config.gc_interval.is_zero() {
            tracing::warn!("⚠️ Session GC interval is zero, background sweep disabled");
        } else {
            tokio::spawn(run_gc(
                store.clone(),
                config.clone(),
                shutdown.child_token(),
            ));
        }

        Self {
            inner: Arc::new(Inner {
                store,
                config,
                shutdown,
            }),
        }
    }

    /// The manager's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Stops the background GC sweep.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn with_timeout<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.inner.config.store_timeout;
        tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| SessionError::Timeout(limit))?
    }

    /// Resolves the session for an incoming request and attaches it to the
    /// request extensions.
    ///
    /// Any failure along the way (no cookie, unreadable store, missing or
    /// expired record) yields a fresh anonymous session.
    pub async fn start<B>(&self, mut request: Request<B>) -> (Session, Request<B>) {
        let session = self.load(request.headers()).await;
        request.extensions_mut().insert(session.clone());
        (session, request)
    }

    async fn load(&self, headers: &HeaderMap) -> Session {
        let Some(id) = read_cookie(headers, &self.inner.config.cookie_name) else {
            tracing::debug!("No session cookie, starting a new session");
            return Session::new();
        };

        let session = match self.with_timeout(self.inner.store.read(&id)).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::debug!("Unknown session {}, starting a new session", redact(&id));
                return Session::new();
            }
            Err(e) => {
                tracing::warn!("❌ Failed to read session {}: {}", redact(&id), e);
                return Session::new();
            }
        };

        if !self.validate(&session).await {
            tracing::debug!("Session {} expired, starting a new session", redact(&id));
            return Session::new();
        }

        tracing::debug!("🔑 Resumed session {}", redact(&id));
        session
    }

    /// Checks the session against the expiration policy.
    ///
    /// An expired session is destroyed in the store right away instead of
    /// waiting for the next sweep.
    pub async fn validate(&self, session: &Session) -> bool {
        let record = session.record();
        let expired = self
            .inner
            .config
            .policy()
            .is_expired(record.created_at, record.last_activity_at);

        if !expired {
            return true;
        }

        if let Err(e) = self.with_timeout(self.inner.store.destroy(&record.id)).await {
            tracing::error!("❌ Failed to destroy expired session {}: {}", redact(&record.id), e);
        }
        false
    }

    /// Stamps the session's last activity and writes it through to the store.
    pub async fn save(&self, session: &Session) -> Result<()> {
        session.touch(Utc::now());
        self.with_timeout(self.inner.store.write(session)).await
    }

    /// Gives the session a new id, keeping its data.
    ///
    /// Call at every authentication boundary (login, logout, privilege
    /// change). The record under the old id is destroyed first; if that fails
    /// the id is left unchanged and the error is returned, and the caller
    /// must abort the transition.
    pub async fn migrate(&self, session: &Session) -> Result<()> {
        let _rotation = session.lock_rotation().await;

        let old_id = session.id();
        self.with_timeout(self.inner.store.destroy(&old_id)).await?;
        session.set_id(generate_session_id());

        tracing::debug!("🔄 Rotated session {} to {}", redact(&old_id), redact(&session.id()));
        Ok(())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Extracts the value of the cookie named `name` from the request headers.
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value.to_owned()))
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

async fn run_gc(store: Arc<dyn SessionStore>, config: SessionConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + config.gc_interval, config.gc_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("✅ Session GC started (every {:?})", config.gc_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sweep = store.gc(config.idle_expiration, config.absolute_expiration);
        match tokio::time::timeout(config.store_timeout, sweep).await {
            Ok(Ok(removed)) => {
                tracing::debug!("🧹 Session GC removed {} expired sessions", removed);
            }
            Ok(Err(e)) => {
                tracing::error!("❌ Session GC failed: {}", e);
            }
            Err(_) => {
                tracing::error!("❌ Session GC timed out after {:?}", config.store_timeout);
            }
        }
    }

    tracing::info!("Session GC stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionRecord;
    use crate::session::InMemorySessionStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::HeaderValue;
    use chrono::TimeDelta;
    use sonic_rs::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> SessionConfig {
        SessionConfig {
            cookie_secure: false,
            ..SessionConfig::default()
        }
    }

    fn request_with_cookie(cookie: &str) -> Request<Body> {
        let mut request = Request::new(Body::empty());
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        request
    }

    fn stored(id: &str, created_ago: TimeDelta, active_ago: TimeDelta) -> Session {
        let now = Utc::now();
        Session::from_record(SessionRecord {
            id: id.to_string(),
            data: HashMap::from([("user_id".to_string(), Value::from(7))]),
            created_at: now - created_ago,
            last_activity_at: now - active_ago,
        })
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn read(&self, _id: &str) -> Result<Option<Session>> {
            Err(SessionError::Corrupt("read".to_string()))
        }
        async fn write(&self, _session: &Session) -> Result<()> {
            Err(SessionError::Corrupt("write".to_string()))
        }
        async fn destroy(&self, _id: &str) -> Result<()> {
            Err(SessionError::Corrupt("destroy".to_string()))
        }
        async fn gc(&self, _idle: Duration, _absolute: Duration) -> Result<u64> {
            Err(SessionError::Corrupt("gc".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct CountingStore {
        inner: InMemorySessionStore,
        sweeps: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn read(&self, id: &str) -> Result<Option<Session>> {
            self.inner.read(id).await
        }
        async fn write(&self, session: &Session) -> Result<()> {
            self.inner.write(session).await
        }
        async fn destroy(&self, id: &str) -> Result<()> {
            self.inner.destroy(id).await
        }
        async fn gc(&self, idle: Duration, absolute: Duration) -> Result<u64> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            self.inner.gc(idle, absolute).await
        }
    }

    #[test]
    fn read_cookie_finds_the_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; session_id=abc123"));
        assert_eq!(read_cookie(&headers, "session_id"), Some("abc123".to_string()));
        assert_eq!(read_cookie(&headers, "other"), None);
    }

    #[test]
    fn read_cookie_ignores_empty_values() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("session_id="));
        assert_eq!(read_cookie(&headers, "session_id"), None);
    }

    #[tokio::test]
    async fn start_without_cookie_creates_a_fresh_session() {
        let store = InMemorySessionStore::new();
        let manager = SessionManager::new(store.clone(), config());

        let (session, request) = manager.start(Request::new(Body::empty())).await;

        assert!(session.record().data.is_empty());
        let attached = request.extensions().get::<Session>().unwrap();
        assert!(attached.ptr_eq(&session));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn start_with_valid_cookie_resumes_the_session() {
        let store = InMemorySessionStore::new();
        let existing = stored("resume-me", TimeDelta::minutes(5), TimeDelta::minutes(1));
        store.write(&existing).await.unwrap();
        let manager = SessionManager::new(store, config());

        let (session, _) = manager
            .start(request_with_cookie("session_id=resume-me"))
            .await;

        assert_eq!(session.id(), "resume-me");
        assert_eq!(session.get("user_id"), Some(Value::from(7)));
    }

    #[tokio::test]
    async fn start_with_unknown_cookie_creates_a_fresh_session() {
        let manager = SessionManager::new(InMemorySessionStore::new(), config());

        let (session, _) = manager.start(request_with_cookie("session_id=nope")).await;

        assert_ne!(session.id(), "nope");
        assert!(session.record().data.is_empty());
    }

    #[tokio::test]
    async fn start_with_expired_cookie_destroys_the_record() {
        let store = InMemorySessionStore::new();
        let idle = stored("idle", TimeDelta::minutes(5), TimeDelta::hours(2));
        let old = stored("old", TimeDelta::hours(13), TimeDelta::minutes(5));
        store.write(&idle).await.unwrap();
        store.write(&old).await.unwrap();
        let manager = SessionManager::new(store.clone(), config());

        for id in ["idle", "old"] {
            let (session, _) = manager
                .start(request_with_cookie(&format!("session_id={id}")))
                .await;
            assert_ne!(session.id(), id);
            assert_eq!(session.get("user_id"), None);
            assert!(store.read(id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn start_fails_open_when_the_store_errors() {
        let manager = SessionManager::new(FailingStore, config());

        let (session, _) = manager.start(request_with_cookie("session_id=abc")).await;

        assert_ne!(session.id(), "abc");
        assert!(session.record().data.is_empty());
    }

    #[tokio::test]
    async fn validate_tolerates_failing_destroy() {
        let manager = SessionManager::new(FailingStore, config());
        let expired = stored("expired", TimeDelta::hours(13), TimeDelta::minutes(1));
        assert!(!manager.validate(&expired).await);
    }

    #[tokio::test]
    async fn save_stamps_last_activity_and_writes() {
        let store = InMemorySessionStore::new();
        let manager = SessionManager::new(store.clone(), config());
        let session = stored("saved", TimeDelta::minutes(10), TimeDelta::minutes(10));
        let before = session.last_activity_at();

        manager.save(&session).await.unwrap();

        let loaded = store.read("saved").await.unwrap().unwrap();
        assert!(loaded.last_activity_at() > before);
        assert_eq!(loaded.created_at(), session.created_at());
    }

    #[tokio::test]
    async fn save_surfaces_store_errors() {
        let manager = SessionManager::new(FailingStore, config());
        assert!(manager.save(&Session::new()).await.is_err());
    }

    #[tokio::test]
    async fn migrate_rotates_the_id_and_keeps_the_data() {
        let store = InMemorySessionStore::new();
        let session = stored("A", TimeDelta::minutes(5), TimeDelta::minutes(1));
        store.write(&session).await.unwrap();
        let manager = SessionManager::new(store.clone(), config());

        manager.migrate(&session).await.unwrap();

        assert_ne!(session.id(), "A");
        assert!(store.read("A").await.unwrap().is_none());
        assert_eq!(session.get("user_id"), Some(Value::from(7)));

        manager.save(&session).await.unwrap();
        let rotated = store.read(&session.id()).await.unwrap().unwrap();
        assert_eq!(rotated.get("user_id"), Some(Value::from(7)));
    }

    #[tokio::test]
    async fn migrate_failure_keeps_the_old_id() {
        let manager = SessionManager::new(FailingStore, config());
        let session = stored("A", TimeDelta::minutes(5), TimeDelta::minutes(1));

        assert!(manager.migrate(&session).await.is_err());
        assert_eq!(session.id(), "A");
    }

    #[tokio::test]
    async fn gc_task_sweeps_periodically_until_shutdown() {
        let store = CountingStore::default();
        let stale = stored("stale", TimeDelta::hours(13), TimeDelta::minutes(1));
        store.write(&stale).await.unwrap();

        let manager = SessionManager::new(
            store.clone(),
            SessionConfig {
                gc_interval: Duration::from_millis(20),
                ..config()
            },
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.sweeps.load(Ordering::SeqCst) >= 2);
        assert!(store.read("stale").await.unwrap().is_none());

        manager.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_shutdown = store.sweeps.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn dropping_the_manager_stops_the_gc_task() {
        let store = CountingStore::default();
        let manager = SessionManager::new(
            store.clone(),
            SessionConfig {
                gc_interval: Duration::from_millis(20),
                ..config()
            },
        );
        drop(manager);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_store_calls_time_out() {
        struct SlowStore;

        #[async_trait]
        impl SessionStore for SlowStore {
            async fn read(&self, _id: &str) -> Result<Option<Session>> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(None)
            }
            async fn write(&self, _session: &Session) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
            async fn destroy(&self, _id: &str) -> Result<()> {
                Ok(())
            }
            async fn gc(&self, _idle: Duration, _absolute: Duration) -> Result<u64> {
                Ok(0)
            }
        }

        let manager = SessionManager::new(
            SlowStore,
            SessionConfig {
                store_timeout: Duration::from_millis(20),
                ..config()
            },
        );

        let result = manager.save(&Session::new()).await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));

        let (session, _) = manager.start(request_with_cookie("session_id=slow")).await;
        assert_ne!(session.id(), "slow");
    }
}

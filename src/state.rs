use axum::extract::FromRef;
use deadpool_postgres::Pool;
use crate::config::{Config, SessionBackend};
use crate::error::Result;
use crate::repositories::user as user_repo;
use crate::session::{InMemorySessionStore, PostgresSessionStore, RedisSessionStore, SessionManager};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: Pool,
    /// The session manager.
    pub sessions: SessionManager,
    /// The application's configuration.
    pub config: Config,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// Runs the table migrations and starts the session GC sweep.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        user_repo::migrate(&db).await?;
        tracing::info!("✅ Users table ready");

        let sessions = match config.session_backend {
            SessionBackend::Memory => {
                tracing::warn!("⚠️ Using the in-memory session store, sessions are lost on restart");
                SessionManager::new(InMemorySessionStore::new(), config.session.clone())
            }
            SessionBackend::Postgres => {
                let store = PostgresSessionStore::new(db.clone());
                store.migrate().await?;
                SessionManager::new(store, config.session.clone())
            }
            SessionBackend::Redis => {
                let redis = crate::db::connect_redis(&config.redis_url).await?;
                tracing::info!("✅ Redis Connection Manager initialized");
                SessionManager::new(RedisSessionStore::new(redis), config.session.clone())
            }
        };
        tracing::info!("✅ Session manager initialized ({:?} store)", config.session_backend);

        Ok(AppState {
            db,
            sessions,
            config: config.clone(),
        })
    }
}

impl FromRef<AppState> for SessionManager {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

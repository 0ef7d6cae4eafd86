use std::time::Duration;
use thiserror::Error;

/// Errors raised by the session layer and its storage backends.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session data could not be (de)serialized.
    #[error("Session serialization error: {0}")]
    Serialization(#[from] sonic_rs::Error),

    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// No connection could be checked out of the pool.
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store did not answer within the configured timeout.
    #[error("Session store timed out after {0:?}")]
    Timeout(Duration),

    /// A stored record could not be turned back into a session.
    #[error("Corrupt session record: {0}")]
    Corrupt(String),
}

/// A `Result` type that uses `SessionError` as the error type.
pub type Result<T> = std::result::Result<T, SessionError>;

use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;
use uuid::Uuid;
use crate::{
    error::{AppError, Result},
    models::user::User,
};

/// A helper function to map a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id").map_err(|_| AppError::Internal("Missing column id".to_string()))?,
        email: row.try_get("email").map_err(|_| AppError::Internal("Missing column email".to_string()))?,
        password_hash: row.try_get("password_hash").map_err(|_| AppError::Internal("Missing column password_hash".to_string()))?,
        display_name: row.try_get("display_name").map_err(|_| AppError::Internal("Missing column display_name".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::Internal("Missing column created_at".to_string()))?,
    })
}

/// Creates the `users` table if it does not exist.
pub async fn migrate(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                display_name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .await?;
    Ok(())
}

/// Creates a new user in the database.
///
/// Returns `AppError::Conflict` when the email is already taken.
pub async fn create_user(
    pool: &Pool,
    email: &str,
    password_hash: &str,
    display_name: &str,
) -> Result<User> {
    let client = pool.get().await?;
    let id = Uuid::new_v4();
    let row = client
        .query_one(
            r#"
            INSERT INTO users (id, email, password_hash, display_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, display_name, created_at
            "#,
            &[&id, &email, &password_hash, &display_name],
        )
        .await
        .map_err(|e| {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                AppError::Conflict("Email already registered".to_string())
            } else {
                AppError::Database(e)
            }
        })?;
    row_to_user(&row)
}

/// Finds a user by their email address.
pub async fn find_by_email(pool: &Pool, email: &str) -> Result<Option<User>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT id, email, password_hash, display_name, created_at
            FROM users
            WHERE email = $1
            "#,
            &[&email],
        )
        .await?;
    row.map(|r| row_to_user(&r)).transpose()
}

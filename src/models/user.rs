use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Represents a user in the system.
#[derive(Clone, Debug)]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The user's email address, used to log in.
    pub email: String,
    /// The user's Argon2id password hash.
    pub password_hash: String,
    /// The name shown in the admin area.
    pub display_name: String,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
}

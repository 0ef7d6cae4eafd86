use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sonic_rs::JsonValueTrait;
use std::future::Future;
use tokio::time::Instant;

use crate::{
    error::{AppError, Result},
    services::auth as auth_service,
    session::Session,
    state::AppState,
    validation::auth::*,
};

/// Session key holding the signed-in user's email.
pub const EMAIL_KEY: &str = "email";
/// Session key holding the signed-in user's id.
pub const USER_ID_KEY: &str = "user_id";

/// The request payload for user registration.
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(rename = "confirmPassword")]
    pub confirm_password: String,
}

/// The request payload for user login.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The response payload for authentication-related requests.
#[derive(Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub success: bool,
    pub redirect: String,
}

/// The signed-in user as seen by the session.
#[derive(Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub email: String,
    pub user_id: String,
}

impl AuthResponse {
    fn redirect(to: &str) -> Self {
        AuthResponse {
            success: true,
            redirect: to.to_string(),
        }
    }
}

/// Runs `work` and holds the response back until `min` has elapsed.
///
/// Successful and failed attempts take the same time.
async fn padded<T>(min: std::time::Duration, work: impl Future<Output = Result<T>>) -> Result<T> {
    let deadline = Instant::now() + min;
    let outcome = work.await;
    tokio::time::sleep_until(deadline).await;
    outcome
}

/// Rotates the session id and stores the user in it.
async fn sign_in(state: &AppState, session: &Session, email: &str, user_id: String) -> Result<()> {
    state.sessions.migrate(session).await?;
    session.put(EMAIL_KEY, email);
    session.put(USER_ID_KEY, user_id.as_str());
    Ok(())
}

/// Handles user registration.
#[axum::debug_handler(state = AppState)]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response> {
    tracing::info!("📝 Register attempt");
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;
    validate_password_confirmation(&payload.password, &payload.confirm_password)?;

    let user = padded(state.config.auth_min_response, async {
        let user = auth_service::register_user(&state.db, &payload.email, &payload.password).await?;
        sign_in(&state, &session, &user.email, user.id.to_string()).await?;
        Ok(user)
    })
    .await?;

    tracing::info!("✅ User registered: {}", user.id);
    Ok((StatusCode::CREATED, Json(AuthResponse::redirect("/login"))).into_response())
}

/// Handles user login.
#[axum::debug_handler(state = AppState)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    tracing::info!("🔐 Login attempt");

    let user = padded(state.config.auth_min_response, async {
        validate_email(&payload.email)
            .map_err(|_| AppError::Authentication("invalid credentials".to_string()))?;
        let user =
            auth_service::authenticate_user(&state.db, &payload.email, &payload.password).await?;
        sign_in(&state, &session, &user.email, user.id.to_string()).await?;
        Ok(user)
    })
    .await?;

    tracing::info!("✅ User logged in: {}", user.id);
    Ok((StatusCode::OK, Json(AuthResponse::redirect("/_/admin"))).into_response())
}

/// Handles user logout.
///
/// The id is rotated before the user keys are dropped so the old cookie can
/// not be replayed.
#[axum::debug_handler(state = AppState)]
pub async fn logout(State(state): State<AppState>, session: Session) -> Result<Response> {
    state.sessions.migrate(&session).await?;
    session.delete(EMAIL_KEY);
    session.delete(USER_ID_KEY);

    tracing::info!("👋 User logged out");
    Ok((StatusCode::OK, Json(AuthResponse::redirect("/login"))).into_response())
}

/// Returns the signed-in user.
pub async fn me(session: Session) -> Result<Json<MeResponse>> {
    let field = |key: &str| {
        session
            .get(key)
            .and_then(|value| value.as_str().map(str::to_string))
            .ok_or_else(|| AppError::Authentication("not signed in".to_string()))
    };

    Ok(Json(MeResponse {
        email: field(EMAIL_KEY)?,
        user_id: field(USER_ID_KEY)?,
    }))
}

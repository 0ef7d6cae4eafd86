use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{handlers::auth::USER_ID_KEY, session::Session};

/// Where unauthenticated requests are sent.
pub const LOGIN_PATH: &str = "/_/admin/login";
/// Where authenticated users land when they hit a guest-only route.
pub const HOME_PATH: &str = "/";

/// A middleware that requires a signed-in user in the session.
///
/// Must run inside the session middleware.
///
/// # Arguments
///
/// * `session` - The current session.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The downstream `Response`, or a `303` redirect to the login page.
pub async fn require_auth(session: Session, request: Request, next: Next) -> Response {
    tracing::debug!("🔐 Checking authentication...");

    if !session.contains(USER_ID_KEY) {
        tracing::debug!("❌ No user in session, redirecting to login");
        return Redirect::to(LOGIN_PATH).into_response();
    }

    next.run(request).await
}

/// A middleware that only lets anonymous sessions through.
pub async fn require_guest(session: Session, request: Request, next: Next) -> Response {
    if session.contains(USER_ID_KEY) {
        return Redirect::to(HOME_PATH).into_response();
    }

    next.run(request).await
}

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{
        Extensions, HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, SET_COOKIE, VARY},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use tower_cookies::cookie::{Cookie, SameSite, time::Duration};

use super::{Session, SessionConfig, SessionManager, redact};

const MISSING_SESSION: &str =
    "session not found in request extensions: is the session middleware installed?";

/// Emits the session cookie on a response, at most once.
///
/// The writer is fired when the handler's response head becomes available
/// and once more, unconditionally, when the middleware finishes. Only the
/// first call adds a `Set-Cookie` header; later calls are no-ops.
pub struct CookieWriter {
    cookie_name: String,
    secure: bool,
    max_age_secs: i64,
    session: Session,
    done: bool,
}

impl CookieWriter {
    /// Creates a new `CookieWriter` for `session`.
    pub fn new(config: &SessionConfig, session: Session) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            secure: config.cookie_secure,
            max_age_secs: config.cookie_max_age_secs(),
            session,
            done: false,
        }
    }

    /// Whether the cookie has already been emitted.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Adds the session cookie to `headers` unless it was already emitted.
    ///
    /// The cookie carries the session's id at the time of the call, so a
    /// rotation done by the handler is reflected. Any `Set-Cookie` the
    /// handler produced for the same cookie name is dropped.
    pub fn write_cookie_if_necessary(&mut self, headers: &mut HeaderMap) {
        if self.done {
            return;
        }
        self.done = true;

        let cookie = self.cookie();
        let value = match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("❌ Invalid session cookie header: {}", e);
                return;
            }
        };

        remove_cookie(headers, &self.cookie_name);
        headers.append(SET_COOKIE, value);
    }

    fn cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::new(self.cookie_name.clone(), self.session.id());
        cookie.set_http_only(true);
        cookie.set_secure(self.secure);
        cookie.set_same_site(SameSite::Lax);
        cookie.set_max_age(Duration::seconds(self.max_age_secs));
        cookie.set_path("/");
        cookie
    }
}

/// Drops every `Set-Cookie` header that sets the cookie called `name`.
fn remove_cookie(headers: &mut HeaderMap, name: &str) {
    let kept: Vec<HeaderValue> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter(|value| {
            let same_name = value
                .to_str()
                .ok()
                .and_then(|raw| Cookie::parse(raw).ok())
                .is_some_and(|cookie| cookie.name() == name);
            !same_name
        })
        .cloned()
        .collect();

    headers.remove(SET_COOKIE);
    for value in kept {
        headers.append(SET_COOKIE, value);
    }
}

fn add_cache_headers(headers: &mut HeaderMap) {
    headers.append(VARY, HeaderValue::from_static("Cookie"));
    headers.append(CACHE_CONTROL, HeaderValue::from_static(r#"no-cache="Set-Cookie""#));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Writes the session back to the store.
///
/// The write runs on its own task so that it still completes when the
/// request future is dropped (client disconnect). Failures are only logged.
async fn persist(manager: &SessionManager, session: &Session) {
    let task = {
        let manager = manager.clone();
        let session = session.clone();
        tokio::spawn(async move { manager.save(&session).await })
    };

    match task.await {
        Ok(Ok(())) => {
            tracing::debug!("💾 Session {} saved", redact(&session.id()));
        }
        Ok(Err(e)) => {
            tracing::error!("❌ Failed to write session {}: {}", redact(&session.id()), e);
        }
        Err(e) => {
            tracing::error!("❌ Session save task failed: {}", e);
        }
    }
}

/// A middleware that attaches a session to every request.
///
/// # Arguments
///
/// * `manager` - The session manager.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The handler's `Response`, carrying exactly one session `Set-Cookie` header
/// plus `Vary: Cookie` and a `no-cache="Set-Cookie"` hint. A panicking
/// handler yields a `500` that still carries the cookie; its session is not
/// persisted.
pub async fn handle(
    State(manager): State<SessionManager>,
    request: Request,
    next: Next,
) -> Response {
    let (session, request) = manager.start(request).await;
    let mut writer = CookieWriter::new(manager.config(), session.clone());

    let mut response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(mut response) => {
            persist(&manager, &session).await;
            add_cache_headers(response.headers_mut());
            writer.write_cookie_if_necessary(response.headers_mut());
            response
        }
        Err(payload) => {
            tracing::error!("❌ Handler panicked: {}", panic_message(payload.as_ref()));
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            add_cache_headers(response.headers_mut());
            response
        }
    };

    writer.write_cookie_if_necessary(response.headers_mut());
    response
}

fn session_from_extensions(extensions: &Extensions) -> Session {
    match extensions.get::<Session>() {
        Some(session) => session.clone(),
        None => panic!("{}", MISSING_SESSION),
    }
}

/// Returns the session attached to `request`.
///
/// # Panics
///
/// If the request did not go through [`handle`]. That is a wiring bug, not a
/// runtime condition.
pub fn get_session<B>(request: &http::Request<B>) -> Session {
    session_from_extensions(request.extensions())
}

/// Extracts the current session in a handler.
///
/// # Panics
///
/// If the route is not behind [`handle`].
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(session_from_extensions(&parts.extensions))
    }
}

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header::{COOKIE, LOCATION, SET_COOKIE}},
    middleware::{from_fn, from_fn_with_state},
    response::Response,
    routing::{get, post},
};
use dz::{
    handlers::auth::{EMAIL_KEY, USER_ID_KEY},
    middleware_layer::auth::{LOGIN_PATH, require_auth, require_guest},
    session::{self, InMemorySessionStore, Session, SessionConfig, SessionManager, SessionStore},
};
use futures::future::join_all;
use http_body_util::BodyExt;
use sonic_rs::JsonValueTrait;
use tower::ServiceExt;
use tower_cookies::cookie::Cookie;

struct TestContext {
    app: Router,
    store: InMemorySessionStore,
    cookie_name: String,
}

async fn sign_in(State(manager): State<SessionManager>, session: Session) -> StatusCode {
    match manager.migrate(&session).await {
        Ok(()) => {
            session.put(EMAIL_KEY, "admin@localhost.com");
            session.put(USER_ID_KEY, "1");
            StatusCode::OK
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn sign_out(State(manager): State<SessionManager>, session: Session) -> StatusCode {
    match manager.migrate(&session).await {
        Ok(()) => {
            session.delete(EMAIL_KEY);
            session.delete(USER_ID_KEY);
            StatusCode::OK
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn counter(session: Session) -> String {
    let next = session.get("count").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
    session.put("count", next);
    next.to_string()
}

impl TestContext {
    fn new() -> Self {
        let store = InMemorySessionStore::new();
        let config = SessionConfig {
            cookie_secure: false,
            ..SessionConfig::default()
        };
        let cookie_name = config.cookie_name.clone();
        let manager = SessionManager::new(store.clone(), config);

        let guest = Router::new()
            .route("/login", post(sign_in))
            .route_layer(from_fn(require_guest));
        let protected = Router::new()
            .route("/admin", get(|| async { "dashboard" }))
            .route_layer(from_fn(require_auth));

        let app = Router::new()
            .route("/logout", post(sign_out))
            .route("/count", get(counter))
            .merge(guest)
            .merge(protected)
            .with_state(manager.clone())
            .layer(from_fn_with_state(manager, session::handle));

        Self {
            app,
            store,
            cookie_name,
        }
    }

    async fn send(&self, method: &str, path: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(id) = cookie {
            builder = builder.header(COOKIE, format!("{}={}", self.cookie_name, id));
        }
        self.app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn session_id(&self, response: &Response) -> String {
        let cookies: Vec<Cookie<'static>> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| Cookie::parse(v.to_str().ok()?.to_string()).ok())
            .filter(|c| c.name() == self.cookie_name)
            .collect();
        assert_eq!(cookies.len(), 1, "exactly one session cookie expected");
        cookies[0].value().to_string()
    }
}

#[tokio::test]
async fn login_visit_logout() {
    let ctx = TestContext::new();

    let anonymous = ctx.send("GET", "/admin", None).await;
    assert_eq!(anonymous.status(), StatusCode::SEE_OTHER);
    assert_eq!(anonymous.headers()[LOCATION], LOGIN_PATH);
    let guest_id = ctx.session_id(&anonymous);

    let login = ctx.send("POST", "/login", Some(&guest_id)).await;
    assert_eq!(login.status(), StatusCode::OK);
    let user_id = ctx.session_id(&login);
    assert_ne!(user_id, guest_id, "login must rotate the session id");
    assert!(ctx.store.read(&guest_id).await.unwrap().is_none());

    let admin = ctx.send("GET", "/admin", Some(&user_id)).await;
    assert_eq!(admin.status(), StatusCode::OK);
    assert_eq!(ctx.session_id(&admin), user_id);

    let old_cookie = ctx.send("GET", "/admin", Some(&guest_id)).await;
    assert_eq!(old_cookie.status(), StatusCode::SEE_OTHER);

    let logout = ctx.send("POST", "/logout", Some(&user_id)).await;
    assert_eq!(logout.status(), StatusCode::OK);
    let after_logout = ctx.session_id(&logout);
    assert_ne!(after_logout, user_id);

    let stored = ctx.store.read(&after_logout).await.unwrap().unwrap();
    assert!(!stored.contains(USER_ID_KEY));

    let replay = ctx.send("GET", "/admin", Some(&user_id)).await;
    assert_eq!(replay.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn signed_in_users_cannot_log_in_again() {
    let ctx = TestContext::new();
    let first = ctx.send("POST", "/login", None).await;
    let id = ctx.session_id(&first);

    let again = ctx.send("POST", "/login", Some(&id)).await;
    assert_eq!(again.status(), StatusCode::SEE_OTHER);
    assert_eq!(ctx.session_id(&again), id);
}

#[tokio::test]
async fn values_survive_across_requests() {
    let ctx = TestContext::new();
    let first = ctx.send("GET", "/count", None).await;
    let id = ctx.session_id(&first);

    for expected in 2..=5u64 {
        let response = ctx.send("GET", "/count", Some(&id)).await;
        assert_eq!(ctx.session_id(&response), id);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, expected.to_string().as_bytes());
    }

    let stored = ctx.store.read(&id).await.unwrap().unwrap();
    assert_eq!(stored.get("count").and_then(|v| v.as_u64()), Some(5));
}

#[tokio::test]
async fn unknown_cookies_get_a_fresh_session() {
    let ctx = TestContext::new();
    let response = ctx.send("GET", "/count", Some("forged-id")).await;
    let id = ctx.session_id(&response);
    assert_ne!(id, "forged-id");
    assert!(ctx.store.read("forged-id").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_anonymous_visitors_get_distinct_sessions() {
    let ctx = TestContext::new();
    let responses = join_all((0..64).map(|_| ctx.send("GET", "/count", None))).await;

    let mut ids: Vec<String> = responses.iter().map(|r| ctx.session_id(r)).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 64);
    assert_eq!(ctx.store.len().await, 64);
}

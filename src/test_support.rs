//! In-process fake of the Lumi backend used by tests.
//!
//! Serves the discovery endpoint and the auth endpoints under
//! `/api/{version}`, with knobs for the failure modes the client must absorb.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use url::Url;

use crate::auth::SessionUser;
use crate::config::ClientConfig;

const SESSION_COOKIE: &str = "lumi_session";

/// How the discovery endpoint answers.
#[derive(Debug, Clone)]
pub enum VersionReply {
    Json(Value),
    Raw(&'static str),
    Status(u16),
    /// Never answers; exercises the probe timeout.
    Hang,
}

struct StoredUser {
    user: SessionUser,
    password: String,
}

struct Knobs {
    version_reply: VersionReply,
    check_delay: Option<Duration>,
    check_status: Option<u16>,
    check_requires_session: bool,
    logout_status: Option<u16>,
}

struct BackendState {
    knobs: Mutex<Knobs>,
    users: Mutex<Vec<StoredUser>>,
    sessions: Mutex<HashMap<String, u64>>,
    api_versions_seen: Mutex<Vec<String>>,
    version_hits: AtomicUsize,
    check_hits: AtomicUsize,
    next_id: AtomicU64,
}

/// Running fake backend; shut down on drop.
pub struct FakeBackend {
    address: Url,
    state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl FakeBackend {
    /// Bind to an ephemeral local port and start serving.
    ///
    /// # Panics
    ///
    /// Panics when the listener cannot be bound.
    pub async fn start() -> Self {
        let state = Arc::new(BackendState {
            knobs: Mutex::new(Knobs {
                version_reply: VersionReply::Json(json!({"name": "lumi", "version": 1})),
                check_delay: None,
                check_status: None,
                check_requires_session: false,
                logout_status: None,
            }),
            users: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            api_versions_seen: Mutex::new(Vec::new()),
            version_hits: AtomicUsize::new(0),
            check_hits: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        });

        let app = Router::new()
            .route("/version", get(version))
            .route("/api/{version}/register", post(register))
            .route("/api/{version}/login", post(login))
            .route("/api/{version}/auth/check", get(check_auth))
            .route("/api/{version}/logout", post(logout))
            .route("/api/{version}/refresh", post(refresh))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake backend");
        let local = listener.local_addr().expect("fake backend address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        let address = Url::parse(&format!("http://{local}")).expect("fake backend url");

        FakeBackend {
            address,
            state,
            server,
        }
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn version_url(&self) -> Url {
        self.address.join("/version").expect("version url")
    }

    /// Client configuration pointing at this backend, logging off.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.address.clone(), self.version_url())
            .expect("fake backend config")
            .with_logging(false)
    }

    pub fn set_version_reply(&self, reply: VersionReply) {
        self.state.knobs.lock().version_reply = reply;
    }

    pub fn set_check_delay(&self, delay: Option<Duration>) {
        self.state.knobs.lock().check_delay = delay;
    }

    pub fn set_check_status(&self, status: Option<u16>) {
        self.state.knobs.lock().check_status = status;
    }

    /// Answer `/auth/check` with 401 instead of `authenticated: false`.
    pub fn set_check_requires_session(&self, required: bool) {
        self.state.knobs.lock().check_requires_session = required;
    }

    pub fn set_logout_status(&self, status: Option<u16>) {
        self.state.knobs.lock().logout_status = status;
    }

    pub fn version_hits(&self) -> usize {
        self.state.version_hits.load(Ordering::SeqCst)
    }

    pub fn check_hits(&self) -> usize {
        self.state.check_hits.load(Ordering::SeqCst)
    }

    /// `v1`/`v2` path segment of every API request served, in order.
    pub fn api_versions_seen(&self) -> Vec<String> {
        self.state.api_versions_seen.lock().clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.state.sessions.lock().len()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

type Shared = State<Arc<BackendState>>;

fn error_response(status: u16, message: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": message }))).into_response()
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_owned())
}

fn session_user(state: &BackendState, headers: &HeaderMap) -> Option<SessionUser> {
    let token = session_token(headers)?;
    let id = *state.sessions.lock().get(&token)?;
    state
        .users
        .lock()
        .iter()
        .find(|stored| stored.user.id == id)
        .map(|stored| stored.user.clone())
}

fn record_version(state: &BackendState, version: String) {
    state.api_versions_seen.lock().push(version);
}

async fn version(State(state): Shared) -> Response {
    state.version_hits.fetch_add(1, Ordering::SeqCst);
    let reply = state.knobs.lock().version_reply.clone();
    match reply {
        VersionReply::Json(body) => Json(body).into_response(),
        VersionReply::Raw(body) => body.into_response(),
        VersionReply::Status(status) => error_response(status, "discovery unavailable"),
        VersionReply::Hang => {
            tokio::time::sleep(Duration::from_secs(60)).await;
            error_response(504, "too late")
        }
    }
}

async fn register(State(state): Shared, Path(version): Path<String>, Json(body): Json<Value>) -> Response {
    record_version(&state, version);
    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };
    let (Some(first_name), Some(last_name), Some(username), Some(email), Some(password)) = (
        field("firstName"),
        field("lastName"),
        field("username"),
        field("email"),
        field("password"),
    ) else {
        return error_response(400, "All fields are required");
    };

    let mut users = state.users.lock();
    if users
        .iter()
        .any(|stored| stored.user.email == email || stored.user.username == username)
    {
        return error_response(500, "User already exists");
    }
    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    users.push(StoredUser {
        user: SessionUser {
            id,
            email: email.clone(),
            username: username.clone(),
            first_name,
            last_name,
            role: 1,
        },
        password,
    });

    (
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered",
            "user": { "id": id, "username": username, "email": email }
        })),
    )
        .into_response()
}

async fn login(State(state): Shared, Path(version): Path<String>, Json(body): Json<Value>) -> Response {
    record_version(&state, version);
    let email = body.get("email").and_then(Value::as_str).unwrap_or_default();
    let password = body.get("password").and_then(Value::as_str).unwrap_or_default();

    let user = state
        .users
        .lock()
        .iter()
        .find(|stored| stored.user.email == email && stored.password == password)
        .map(|stored| stored.user.clone());
    let Some(user) = user else {
        return error_response(401, "Invalid credentials");
    };

    let token = format!("s{}-{}", user.id, state.next_id.fetch_add(1, Ordering::SeqCst));
    state.sessions.lock().insert(token.clone(), user.id);
    let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly");
    ([(header::SET_COOKIE, cookie)], Json(user)).into_response()
}

async fn check_auth(State(state): Shared, Path(version): Path<String>, headers: HeaderMap) -> Response {
    record_version(&state, version);
    state.check_hits.fetch_add(1, Ordering::SeqCst);
    let (delay, forced_status, requires_session) = {
        let knobs = state.knobs.lock();
        (knobs.check_delay, knobs.check_status, knobs.check_requires_session)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(status) = forced_status {
        return error_response(status, "check failed");
    }

    match session_user(&state, &headers) {
        Some(user) => Json(json!({ "authenticated": true, "user": user })).into_response(),
        None if requires_session => error_response(401, "Not authenticated"),
        None => Json(json!({ "authenticated": false, "user": null })).into_response(),
    }
}

async fn logout(State(state): Shared, Path(version): Path<String>, headers: HeaderMap) -> Response {
    record_version(&state, version);
    let forced_status = state.knobs.lock().logout_status;
    if let Some(status) = forced_status {
        return error_response(status, "logout failed");
    }
    if let Some(token) = session_token(&headers) {
        state.sessions.lock().remove(&token);
    }
    let cookie = format!("{SESSION_COOKIE}=; Path=/; Max-Age=0");
    ([(header::SET_COOKIE, cookie)], Json(json!({ "message": "Logged out" }))).into_response()
}

async fn refresh(State(state): Shared, Path(version): Path<String>, headers: HeaderMap) -> Response {
    record_version(&state, version);
    match session_user(&state, &headers) {
        Some(user) => Json(json!({
            "access_token": format!("access-{}", user.id),
            "refresh_token": format!("refresh-{}", user.id),
        }))
        .into_response(),
        None => error_response(401, "Not authenticated"),
    }
}

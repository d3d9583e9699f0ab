#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parkspot_contracts::identity::SignInRequest;
use parkspot_contracts::notify::{PushMessage, PushNotification};
use parkspot_contracts::parking::{Direction, DisplayName, Floor, LogId};
use parkspot_contracts::ContractViolation;
use parkspot_os::{
    MemoryNotificationSink, NotificationWorker, PageChannel, PageFocus, ParkingShell,
    PushOutcome, ShellError, ShellView,
};
use parkspot_storage::{IdentityError, MemoryDocumentStore, MemoryIdentityProvider};
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info, warn};

pub mod config;

pub use config::{AdapterConfig, ConfigError};

pub mod app_ui_assets {
    pub const APP_HTML: &str = include_str!("web/app.html");
    pub const APP_CSS: &str = include_str!("web/app.css");
    pub const APP_JS: &str = include_str!("web/app.js");

    /// Placeholder in `APP_HTML` replaced with the deploy base path.
    pub const BASE_PATH_PLACEHOLDER: &str = "__PARKSPOT_BASE__";
}

pub const SESSION_COOKIE: &str = "parkspot_session";
/// Oldest sessions are evicted past this many.
pub const MAX_SESSIONS: usize = 256;
const SESSION_ID_BYTES: usize = 16;

/// Opaque browser session key carried in the `parkspot_session` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn mint() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        (raw.len() == SESSION_ID_BYTES * 2 && raw.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| Self(raw.to_ascii_lowercase()))
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .and_then(|(_, value)| Self::parse(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignInAdapterRequest {
    pub display_name: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DirectionAdapterRequest {
    pub direction: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmitAdapterRequest {
    pub floor: u8,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FocusAdapterRequest {
    pub focused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ShellAdapterResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub record_id: Option<LogId>,
    pub view: ShellView,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PushAdapterResponse {
    pub status: String,
    pub outcome: Option<PushOutcome>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub project_id: String,
    pub collection: String,
    pub cleanup_policy: String,
    pub stored_records: usize,
    pub open_sessions: usize,
    pub degraded_sessions: usize,
}

/// Rejection carried back to the HTTP layer: status code plus a user-facing reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRejection {
    pub status: StatusCode,
    pub outcome: &'static str,
    pub reason: String,
}

impl From<ContractViolation> for AdapterRejection {
    fn from(v: ContractViolation) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            outcome: "INVALID_INPUT",
            reason: v.to_string(),
        }
    }
}

impl From<&ShellError> for AdapterRejection {
    fn from(err: &ShellError) -> Self {
        let (status, outcome) = match err {
            ShellError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "NOT_AUTHENTICATED"),
            ShellError::MissingDirection => {
                (StatusCode::UNPROCESSABLE_ENTITY, "MISSING_DIRECTION")
            }
            ShellError::Busy => (StatusCode::CONFLICT, "BUSY"),
            ShellError::WriteFailed(_) => (StatusCode::BAD_GATEWAY, "WRITE_FAILED"),
            ShellError::SubscriptionError(_) => (StatusCode::BAD_GATEWAY, "SUBSCRIPTION_ERROR"),
            ShellError::SignInFailed(IdentityError::UserCancelled) => {
                (StatusCode::UNAUTHORIZED, "SIGN_IN_CANCELLED")
            }
            ShellError::SignInFailed(IdentityError::NetworkError(_)) => {
                (StatusCode::BAD_GATEWAY, "SIGN_IN_UNAVAILABLE")
            }
        };
        Self {
            status,
            outcome,
            reason: err.user_message().to_string(),
        }
    }
}

/// One browser: its own identity, shell session, page channel and displayed
/// notifications. Every session writes to the same store.
pub struct ClientSession {
    identity: Arc<MemoryIdentityProvider>,
    shell: Arc<ParkingShell>,
    page: PageChannel,
    sink: Arc<MemoryNotificationSink>,
    worker: NotificationWorker,
}

impl ClientSession {
    /// Must run inside a tokio runtime; the shell starts following its identity.
    fn open(config: &AdapterConfig, store: Arc<MemoryDocumentStore>) -> Self {
        let identity = Arc::new(MemoryIdentityProvider::new_in_memory());
        let shell = Arc::new(ParkingShell::new(
            store,
            identity.clone(),
            config.shell.clone(),
        ));
        shell.follow_identity();
        let sink = Arc::new(MemoryNotificationSink::new_in_memory());
        let worker = NotificationWorker::new(sink.clone());
        Self {
            identity,
            shell,
            page: PageChannel::new(),
            sink,
            worker,
        }
    }

    pub fn identity_provider(&self) -> &Arc<MemoryIdentityProvider> {
        &self.identity
    }

    pub fn view(&self) -> ShellView {
        self.shell.view()
    }

    fn ok(&self, outcome: &str, record_id: Option<LogId>) -> ShellAdapterResponse {
        ShellAdapterResponse {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
            reason: None,
            record_id,
            view: self.view(),
        }
    }

    pub fn rejection_response(&self, rejection: &AdapterRejection) -> ShellAdapterResponse {
        ShellAdapterResponse {
            status: "error".to_string(),
            outcome: rejection.outcome.to_string(),
            reason: Some(rejection.reason.clone()),
            record_id: None,
            view: self.view(),
        }
    }

    pub async fn sign_in(
        &self,
        request: SignInAdapterRequest,
    ) -> Result<ShellAdapterResponse, AdapterRejection> {
        let display_name = DisplayName::new(request.display_name.trim())?;
        self.shell
            .sign_in(SignInRequest { display_name })
            .await
            .map_err(|e| AdapterRejection::from(&e))?;
        Ok(self.ok("SIGNED_IN", None))
    }

    pub async fn sign_out(&self) -> ShellAdapterResponse {
        self.shell.sign_out().await;
        self.ok("SIGNED_OUT", None)
    }

    pub fn select_direction(
        &self,
        request: DirectionAdapterRequest,
    ) -> Result<ShellAdapterResponse, AdapterRejection> {
        let direction =
            Direction::parse(&request.direction).ok_or(ContractViolation::InvalidValue {
                field: "direction",
                reason: "must be Left or Right",
            })?;
        self.shell.select_direction(direction);
        Ok(self.ok("DIRECTION_SELECTED", None))
    }

    pub async fn submit(
        &self,
        request: SubmitAdapterRequest,
    ) -> Result<ShellAdapterResponse, AdapterRejection> {
        let floor = Floor::new(request.floor)?;
        match self.shell.submit(floor).await {
            Ok(id) => Ok(self.ok("SAVED", Some(id))),
            Err(err) => Err(AdapterRejection::from(&err)),
        }
    }

    pub fn set_focus(&self, request: FocusAdapterRequest) -> PageFocus {
        let focus = if request.focused {
            PageFocus::Focused
        } else {
            PageFocus::Background
        };
        self.page.set_focus(focus);
        focus
    }

    pub fn focus(&self) -> PageFocus {
        self.page.focus()
    }

    pub fn push(&self, message: PushMessage) -> Result<PushOutcome, AdapterRejection> {
        self.worker.handle_push(&message, &self.page).map_err(|e| {
            warn!(error = %e, "push payload rejected");
            AdapterRejection::from(e)
        })
    }

    /// Notifications the platform sink displayed for this session.
    pub fn notifications(&self) -> Vec<PushNotification> {
        self.sink.displayed()
    }

    /// Drains the payloads handed to the page while it was focused.
    pub fn page_messages(&self) -> Vec<PushNotification> {
        self.page.take_messages()
    }

    fn shutdown(&self) {
        self.shell.shutdown();
    }
}

#[derive(Default)]
struct SessionTable {
    by_id: HashMap<SessionId, Arc<ClientSession>>,
    // Creation order, oldest first.
    order: VecDeque<SessionId>,
}

/// A session handle plus whether the cookie still has to be set on the client.
pub struct SessionTicket {
    pub id: SessionId,
    pub session: Arc<ClientSession>,
    pub fresh: bool,
}

/// Process-wide owner of the shared store and the per-browser sessions.
pub struct AdapterRuntime {
    config: AdapterConfig,
    store: Arc<MemoryDocumentStore>,
    sessions: Mutex<SessionTable>,
}

impl AdapterRuntime {
    pub fn new(config: AdapterConfig) -> Self {
        info!(
            project_id = config.connection.project_id.as_str(),
            collection = config.shell.collection.as_str(),
            cleanup = config.shell.cleanup.as_str(),
            "adapter runtime ready"
        );
        Self {
            config,
            store: Arc::new(MemoryDocumentStore::new_in_memory()),
            sessions: Mutex::new(SessionTable::default()),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn sessions(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the session for `presented`, or opens a new one under a freshly
    /// minted id when the cookie is absent or unknown.
    pub fn open_session(&self, presented: Option<SessionId>) -> SessionTicket {
        let mut table = self.sessions();
        if let Some(id) = presented {
            if let Some(session) = table.by_id.get(&id) {
                return SessionTicket {
                    session: Arc::clone(session),
                    id,
                    fresh: false,
                };
            }
        }

        let id = SessionId::mint();
        let session = Arc::new(ClientSession::open(&self.config, self.store.clone()));
        table.by_id.insert(id.clone(), Arc::clone(&session));
        table.order.push_back(id.clone());
        while table.order.len() > MAX_SESSIONS {
            if let Some(evicted) = table.order.pop_front() {
                if let Some(old) = table.by_id.remove(&evicted) {
                    old.shutdown();
                }
                debug!("oldest session evicted");
            }
        }
        debug!(open_sessions = table.by_id.len(), "session opened");
        SessionTicket {
            id,
            session,
            fresh: true,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions().by_id.len()
    }

    /// Cookie that binds the client to `id`, scoped to the base path.
    pub fn session_cookie(&self, id: &SessionId) -> String {
        format!(
            "{SESSION_COOKIE}={}; Path={}; HttpOnly; SameSite=Strict",
            id.as_str(),
            self.config.base_path
        )
    }

    pub fn shutdown(&self) {
        let table = self.sessions();
        for session in table.by_id.values() {
            session.shutdown();
        }
        info!(sessions = table.by_id.len(), "adapter sessions shut down");
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        let (open_sessions, degraded_sessions) = {
            let table = self.sessions();
            let degraded = table
                .by_id
                .values()
                .filter(|s| !s.view().subscription_healthy)
                .count();
            (table.by_id.len(), degraded)
        };
        AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: if degraded_sessions == 0 {
                "HEALTHY".to_string()
            } else {
                "DEGRADED".to_string()
            },
            project_id: self.config.connection.project_id.clone(),
            collection: self.config.shell.collection.clone(),
            cleanup_policy: self.config.shell.cleanup.as_str().to_string(),
            stored_records: self.store.len(&self.config.shell.collection),
            open_sessions,
            degraded_sessions,
        }
    }
}

type SharedRuntime = Arc<AdapterRuntime>;

/// Routes for the page and its JSON API, nested under the configured base path.
pub fn build_router(runtime: SharedRuntime) -> Router {
    let base_path = runtime.config().base_path.clone();
    let app = Router::new()
        .route("/", get(index))
        .route("/app.css", get(app_css))
        .route("/app.js", get(app_js))
        .route("/healthz", get(healthz))
        .route("/v1/view", get(view))
        .route("/v1/session/sign_in", post(sign_in))
        .route("/v1/session/sign_out", post(sign_out))
        .route("/v1/selection/direction", post(select_direction))
        .route("/v1/submit", post(submit))
        .route("/v1/page/focus", post(set_focus))
        .route("/v1/page/messages", get(page_messages))
        .route("/v1/push", post(push))
        .route("/v1/notifications", get(notifications))
        .with_state(runtime);
    if base_path == "/" {
        app
    } else {
        Router::new().nest(&base_path, app)
    }
}

fn ticket(runtime: &AdapterRuntime, headers: &HeaderMap) -> SessionTicket {
    runtime.open_session(SessionId::from_headers(headers))
}

/// JSON response that also sets the session cookie for a freshly opened session.
fn reply<T: Serialize>(
    runtime: &AdapterRuntime,
    ticket: &SessionTicket,
    status: StatusCode,
    body: T,
) -> Response {
    let mut response = (status, Json(body)).into_response();
    if ticket.fresh {
        match HeaderValue::from_str(&runtime.session_cookie(&ticket.id)) {
            Ok(cookie) => {
                response.headers_mut().insert(header::SET_COOKIE, cookie);
            }
            Err(err) => warn!(error = %err, "session cookie not encodable"),
        }
    }
    response
}

fn shell_reply(
    runtime: &AdapterRuntime,
    ticket: &SessionTicket,
    result: Result<ShellAdapterResponse, AdapterRejection>,
) -> Response {
    match result {
        Ok(response) => reply(runtime, ticket, StatusCode::OK, response),
        Err(rejection) => reply(
            runtime,
            ticket,
            rejection.status,
            ticket.session.rejection_response(&rejection),
        ),
    }
}

async fn index(State(runtime): State<SharedRuntime>) -> Html<String> {
    Html(app_ui_assets::APP_HTML.replace(
        app_ui_assets::BASE_PATH_PLACEHOLDER,
        runtime.config().asset_prefix(),
    ))
}

async fn app_css() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css")], app_ui_assets::APP_CSS)
}

async fn app_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        app_ui_assets::APP_JS,
    )
}

async fn healthz(State(runtime): State<SharedRuntime>) -> Json<AdapterHealthResponse> {
    Json(runtime.health_report())
}

async fn view(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let ticket = ticket(&runtime, &headers);
    reply(&runtime, &ticket, StatusCode::OK, ticket.session.view())
}

async fn sign_in(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<SignInAdapterRequest>,
) -> Response {
    let ticket = ticket(&runtime, &headers);
    let result = ticket.session.sign_in(request).await;
    shell_reply(&runtime, &ticket, result)
}

async fn sign_out(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let ticket = ticket(&runtime, &headers);
    let response = ticket.session.sign_out().await;
    reply(&runtime, &ticket, StatusCode::OK, response)
}

async fn select_direction(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<DirectionAdapterRequest>,
) -> Response {
    let ticket = ticket(&runtime, &headers);
    let result = ticket.session.select_direction(request);
    shell_reply(&runtime, &ticket, result)
}

async fn submit(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<SubmitAdapterRequest>,
) -> Response {
    let ticket = ticket(&runtime, &headers);
    let result = ticket.session.submit(request).await;
    shell_reply(&runtime, &ticket, result)
}

async fn set_focus(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(request): Json<FocusAdapterRequest>,
) -> Response {
    let ticket = ticket(&runtime, &headers);
    let focus = ticket.session.set_focus(request);
    reply(&runtime, &ticket, StatusCode::OK, focus)
}

async fn page_messages(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let ticket = ticket(&runtime, &headers);
    let messages = ticket.session.page_messages();
    reply(&runtime, &ticket, StatusCode::OK, messages)
}

/// Delivers a push addressed to the calling browser session.
async fn push(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(message): Json<PushMessage>,
) -> Response {
    let ticket = ticket(&runtime, &headers);
    let (status, body) = match ticket.session.push(message) {
        Ok(outcome) => (
            StatusCode::OK,
            PushAdapterResponse {
                status: "ok".to_string(),
                outcome: Some(outcome),
                reason: None,
            },
        ),
        Err(rejection) => (
            rejection.status,
            PushAdapterResponse {
                status: "error".to_string(),
                outcome: None,
                reason: Some(rejection.reason),
            },
        ),
    };
    reply(&runtime, &ticket, status, body)
}

async fn notifications(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let ticket = ticket(&runtime, &headers);
    let shown = ticket.session.notifications();
    reply(&runtime, &ticket, StatusCode::OK, shown)
}

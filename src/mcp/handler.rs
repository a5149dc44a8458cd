//! MCP HTTP Handlers
//!
//! Routes `POST`, `GET` and `DELETE /mcp` to the right session, creating one
//! on first contact, and delegates the byte-level work to its transport.

use std::future::Future;
use std::sync::{Arc, Weak};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info, warn};

use super::builtin_definitions;
use super::error::{CapabilityError, RequestError, TransportError};
use super::factory::{ServerFactory, ServerOptions};
use super::protocol::{McpError, ServerInfo};
use super::session::{Session, SessionManager};
use super::timeout::with_timeout;
use super::transport::{
    json_rpc_error, StreamableHttpTransport, Transport, TransportOptions, TransportRequest,
    MCP_SESSION_ID_HEADER,
};
use crate::auth::{extract_bearer_token, Caller, TokenAuthenticator};
use crate::config::McpSettings;
use crate::server::metrics;
use crate::server::state::{GuardedMcpState, ServerState};

lazy_static! {
    static ref SESSION_ID_PATTERN: Regex = Regex::new(
        r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"
    )
    .expect("Failed to compile session id pattern");
}

/// State shared by all MCP requests
pub struct McpState {
    pub settings: McpSettings,
    pub sessions: Arc<SessionManager>,
    pub factory: Arc<ServerFactory>,
    pub authenticator: Option<Arc<dyn TokenAuthenticator>>,
}

impl McpState {
    pub fn new(
        settings: McpSettings,
        factory: Arc<ServerFactory>,
        authenticator: Option<Arc<dyn TokenAuthenticator>>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::from_settings(&settings));
        Self {
            settings,
            sessions,
            factory,
            authenticator,
        }
    }

    /// State serving the built-in capability definitions.
    pub fn with_builtins(
        settings: McpSettings,
        authenticator: Option<Arc<dyn TokenAuthenticator>>,
    ) -> Result<Self, CapabilityError> {
        let definitions = builtin_definitions(&settings)?;
        let options = ServerOptions {
            is_dev_mode: settings.is_dev_mode(),
            info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let factory = ServerFactory::new(Arc::new(definitions), options);
        Ok(Self::new(settings, Arc::new(factory), authenticator))
    }

    fn request_timeout_ms(&self) -> u64 {
        self.settings.request_timeout_ms
    }
}

/// Routes for the MCP endpoint. Unsupported methods answer 405.
pub fn mcp_routes(settings: &McpSettings) -> Router<ServerState> {
    Router::new().route(
        settings.path(),
        post(handle_post).get(handle_get).delete(handle_delete),
    )
}

/// The `mcp-session-id` header, if present and shaped like a UUID.
pub fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(MCP_SESSION_ID_HEADER)?.to_str().ok()?;
    if value.len() == 36 && SESSION_ID_PATTERN.is_match(value) {
        Some(value.to_string())
    } else {
        None
    }
}

pub async fn handle_post(
    State(mcp): State<GuardedMcpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller = match authenticate(&mcp, &headers).await {
        Ok(caller) => caller,
        Err(rejection) => return rejection,
    };
    let request = TransportRequest {
        method: Method::POST,
        headers,
        body,
        caller,
    };

    let Some(session_id) = extract_session_id(&request.headers) else {
        return start_session(&mcp, request).await;
    };
    let Some(session) = mcp.sessions.get(&session_id) else {
        debug!(session_id = %session_id, "POST for unknown MCP session");
        return invalid_session();
    };
    session.update_activity();
    delegate(
        "transport.handleRequest",
        mcp.request_timeout_ms(),
        session.transport.handle_request(request),
    )
    .await
}

pub async fn handle_get(State(mcp): State<GuardedMcpState>, headers: HeaderMap) -> Response {
    let caller = match authenticate(&mcp, &headers).await {
        Ok(caller) => caller,
        Err(rejection) => return rejection,
    };
    let session = match require_session(&mcp, &headers) {
        Ok(session) => session,
        Err(rejection) => return rejection,
    };
    session.update_activity();

    let request = TransportRequest {
        method: Method::GET,
        headers,
        body: Bytes::new(),
        caller,
    };
    delegate(
        "transport.handleRequest",
        mcp.request_timeout_ms(),
        session.transport.handle_request(request),
    )
    .await
}

/// Terminates a session. Does not count as session activity.
pub async fn handle_delete(State(mcp): State<GuardedMcpState>, headers: HeaderMap) -> Response {
    let caller = match authenticate(&mcp, &headers).await {
        Ok(caller) => caller,
        Err(rejection) => return rejection,
    };
    let session = match require_session(&mcp, &headers) {
        Ok(session) => session,
        Err(rejection) => return rejection,
    };

    let request = TransportRequest {
        method: Method::DELETE,
        headers,
        body: Bytes::new(),
        caller,
    };
    let response = delegate(
        "transport.handleRequest",
        mcp.request_timeout_ms(),
        session.transport.handle_request(request),
    )
    .await;

    // Closing the transport usually detached the session already.
    mcp.sessions.delete(session.id()).await;
    response
}

/// Admit, build and connect a new session, then hand it the first request.
async fn start_session(mcp: &McpState, request: TransportRequest) -> Response {
    let Some(admission) = mcp.sessions.try_admit() else {
        metrics::record_session_rejected();
        warn!(
            "Rejecting new MCP session: {} of {} sessions in use",
            mcp.sessions.size(),
            mcp.sessions.max_sessions()
        );
        return json_rpc_error(StatusCode::SERVICE_UNAVAILABLE, McpError::MaxSessionsReached);
    };

    let (server, registries) = match mcp.factory.create() {
        Ok(created) => created,
        Err(e) => return request_failed("factory.create", e.into()),
    };
    if let Some(caller) = request.caller.as_ref() {
        let enabled = registries.enable_authorized(caller, mcp.factory.options().is_dev_mode);
        debug!(caller = %caller.id, "Enabled capabilities for caller: {:?}", enabled);
    }

    let caller = request.caller.clone();
    let session_server = Arc::clone(&server);
    let manager: Weak<SessionManager> = Arc::downgrade(&mcp.sessions);
    let transport = Arc::new_cyclic(|this: &Weak<StreamableHttpTransport>| {
        let this = this.clone();
        StreamableHttpTransport::new(TransportOptions {
            on_session_initialized: Some(Box::new(move |session_id: &str| {
                let Some(transport) = this.upgrade() else {
                    return;
                };
                let session = Session::new(
                    session_id.to_string(),
                    session_server,
                    transport,
                    registries,
                    caller,
                );
                admission.complete(Arc::new(session));
                info!(session_id = %session_id, "MCP session initialized");
            })),
            on_session_closed: Some(Box::new(move |session_id: &str| {
                if let Some(manager) = manager.upgrade() {
                    manager.handle_transport_closed(session_id);
                }
            })),
            ..Default::default()
        })
    });

    let timeout_ms = mcp.request_timeout_ms();
    if let Err(e) = with_timeout(transport.connect(server), timeout_ms, "server.connect").await {
        return request_failed("server.connect", e);
    }
    delegate(
        "transport.handleRequest",
        timeout_ms,
        transport.handle_request(request),
    )
    .await
}

async fn delegate<F>(operation: &str, timeout_ms: u64, future: F) -> Response
where
    F: Future<Output = Result<Response, TransportError>>,
{
    match with_timeout(future, timeout_ms, operation).await {
        Ok(response) => response,
        Err(e) => request_failed(operation, e),
    }
}

/// Log a failed delegation and answer with a detail-free internal error.
fn request_failed(operation: &str, err: RequestError) -> Response {
    error!("MCP {} failed: {}", operation, err);
    metrics::record_request_failure(operation, err.reason());
    json_rpc_error(StatusCode::INTERNAL_SERVER_ERROR, McpError::internal())
}

/// Resolve the bearer token, if any. A rejected token answers 401.
async fn authenticate(mcp: &McpState, headers: &HeaderMap) -> Result<Option<Caller>, Response> {
    let Some(authenticator) = mcp.authenticator.as_ref() else {
        return Ok(None);
    };
    let Some(token) = extract_bearer_token(headers) else {
        return Ok(None);
    };
    match authenticator.authenticate(token).await {
        Ok(caller) => Ok(Some(caller)),
        Err(e) => {
            warn!("Rejected MCP bearer token: {}", e);
            Err(json_rpc_error(StatusCode::UNAUTHORIZED, McpError::Unauthorized))
        }
    }
}

fn require_session(mcp: &McpState, headers: &HeaderMap) -> Result<Arc<Session>, Response> {
    let Some(session_id) = extract_session_id(headers) else {
        return Err(json_rpc_error(
            StatusCode::BAD_REQUEST,
            McpError::ServerError("Bad Request: Session ID required".to_string()),
        ));
    };
    mcp.sessions.get(&session_id).ok_or_else(invalid_session)
}

fn invalid_session() -> Response {
    json_rpc_error(
        StatusCode::BAD_REQUEST,
        McpError::ServerError("Bad Request: Invalid session ID".to_string()),
    )
}

//! Streamable HTTP transport
//!
//! The transport owns the byte-level side of a session: it parses JSON-RPC
//! messages, checks the `mcp-session-id` header, hands messages to its
//! [`McpServer`] and streams server notifications over SSE.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::capability::RequestContext;
use super::error::TransportError;
use super::protocol::{methods, McpError, McpRequest, McpResponse, JSONRPC_VERSION};
use super::server::McpServer;
use crate::auth::Caller;

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// An inbound HTTP request, already read into memory.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub caller: Option<Caller>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, server: Arc<McpServer>) -> Result<(), TransportError>;

    async fn handle_request(&self, request: TransportRequest) -> Result<Response, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    fn session_id(&self) -> Option<String>;
}

pub type SessionIdGenerator = Box<dyn Fn() -> String + Send + Sync>;
pub type SessionCallback = Box<dyn FnOnce(&str) + Send>;

pub struct TransportOptions {
    pub session_id_generator: SessionIdGenerator,
    /// Fires once, when `initialize` generated the session id.
    pub on_session_initialized: Option<SessionCallback>,
    /// Fires once, when the transport closes after initialization.
    pub on_session_closed: Option<SessionCallback>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            session_id_generator: Box::new(|| uuid::Uuid::new_v4().to_string()),
            on_session_initialized: None,
            on_session_closed: None,
        }
    }
}

pub struct StreamableHttpTransport {
    server: OnceLock<Arc<McpServer>>,
    session_id: Mutex<Option<String>>,
    generator: SessionIdGenerator,
    on_initialized: Mutex<Option<SessionCallback>>,
    on_closed: Mutex<Option<SessionCallback>>,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            server: OnceLock::new(),
            session_id: Mutex::new(None),
            generator: options.session_id_generator,
            on_initialized: Mutex::new(options.on_session_initialized),
            on_closed: Mutex::new(options.on_session_closed),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn handle_post(
        &self,
        server: Arc<McpServer>,
        request: TransportRequest,
    ) -> Result<Response, TransportError> {
        let value: Value = match serde_json::from_slice(&request.body) {
            Ok(value) => value,
            Err(e) => {
                return Ok(json_rpc_error(
                    StatusCode::BAD_REQUEST,
                    McpError::ParseError(e.to_string()),
                ))
            }
        };
        if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Ok(json_rpc_error(
                StatusCode::BAD_REQUEST,
                McpError::InvalidRequest("expected a single JSON-RPC 2.0 message".to_string()),
            ));
        }
        let message: McpRequest = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                return Ok(json_rpc_error(
                    StatusCode::BAD_REQUEST,
                    McpError::InvalidRequest(e.to_string()),
                ))
            }
        };

        if message.method == methods::INITIALIZE {
            return self.handle_initialize(server, message, request.caller).await;
        }

        let Some(session_id) = self.session_id() else {
            return Ok(json_rpc_error(
                StatusCode::BAD_REQUEST,
                McpError::ServerError("Bad Request: Server not initialized".to_string()),
            ));
        };
        if let Some(rejection) = check_session_header(&request.headers, &session_id) {
            return Ok(rejection);
        }

        let ctx = RequestContext {
            session_id: Some(session_id.clone()),
            caller: request.caller,
        };
        match server.handle_message(message, ctx).await {
            Some(response) => Ok(json_response(response, &session_id)),
            None => Ok(StatusCode::ACCEPTED.into_response()),
        }
    }

    async fn handle_initialize(
        &self,
        server: Arc<McpServer>,
        message: McpRequest,
        caller: Option<Caller>,
    ) -> Result<Response, TransportError> {
        let session_id = {
            let mut current = self.session_id.lock();
            if current.is_some() {
                return Ok(json_rpc_error(
                    StatusCode::BAD_REQUEST,
                    McpError::InvalidRequest("Server already initialized".to_string()),
                ));
            }
            let generated = (self.generator)();
            *current = Some(generated.clone());
            generated
        };

        let callback = self.on_initialized.lock().take();
        if let Some(callback) = callback {
            callback(&session_id);
        }
        debug!(session_id = %session_id, "Transport initialized");

        let ctx = RequestContext {
            session_id: Some(session_id.clone()),
            caller,
        };
        match server.handle_message(message, ctx).await {
            Some(response) => Ok(json_response(response, &session_id)),
            None => Ok(StatusCode::ACCEPTED.into_response()),
        }
    }

    fn handle_get(&self, server: Arc<McpServer>, headers: &HeaderMap) -> Response {
        let accepts_sse = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));
        if !accepts_sse {
            return json_rpc_error(
                StatusCode::NOT_ACCEPTABLE,
                McpError::InvalidRequest(
                    "Not Acceptable: Client must accept text/event-stream".to_string(),
                ),
            );
        }

        let Some(session_id) = self.session_id() else {
            return json_rpc_error(
                StatusCode::BAD_REQUEST,
                McpError::ServerError("Bad Request: Server not initialized".to_string()),
            );
        };
        if let Some(rejection) = check_session_header(headers, &session_id) {
            return rejection;
        }

        let stream = futures::stream::unfold(
            (server.subscribe(), server.closed_signal()),
            |(mut notifications, mut closed)| async move {
                loop {
                    if *closed.borrow_and_update() {
                        return None;
                    }
                    tokio::select! {
                        received = notifications.recv() => match received {
                            Ok(notification) => match Event::default().event("message").json_data(&notification) {
                                Ok(event) => {
                                    return Some((Ok::<_, Infallible>(event), (notifications, closed)))
                                }
                                Err(e) => warn!("Failed to encode notification: {}", e),
                            },
                            Err(RecvError::Lagged(skipped)) => {
                                debug!("SSE stream lagged, skipped {} notifications", skipped)
                            }
                            Err(RecvError::Closed) => return None,
                        },
                        changed = closed.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
            },
        );

        let mut response = Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response();
        insert_session_header(&mut response, &session_id);
        response
    }

    async fn handle_delete(&self, headers: &HeaderMap) -> Result<Response, TransportError> {
        let Some(session_id) = self.session_id() else {
            return Ok(json_rpc_error(
                StatusCode::BAD_REQUEST,
                McpError::ServerError("Bad Request: Server not initialized".to_string()),
            ));
        };
        if let Some(rejection) = check_session_header(headers, &session_id) {
            return Ok(rejection);
        }
        self.close().await?;
        Ok(StatusCode::OK.into_response())
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn connect(&self, server: Arc<McpServer>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.server
            .set(server)
            .map_err(|_| TransportError::AlreadyConnected)
    }

    async fn handle_request(&self, request: TransportRequest) -> Result<Response, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let server = self
            .server
            .get()
            .cloned()
            .ok_or(TransportError::NotConnected)?;

        let method = request.method.clone();
        match method {
            Method::POST => self.handle_post(server, request).await,
            Method::GET => Ok(self.handle_get(server, &request.headers)),
            Method::DELETE => self.handle_delete(&request.headers).await,
            _ => Ok(method_not_allowed()),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let callback = self.on_closed.lock().take();
        if let (Some(callback), Some(session_id)) = (callback, self.session_id()) {
            debug!(session_id = %session_id, "Transport closed");
            callback(&session_id);
        }
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }
}

/// JSON-RPC error envelope with a `null` id.
pub fn json_rpc_error(status: StatusCode, error: McpError) -> Response {
    (status, Json(McpResponse::error(None, error))).into_response()
}

fn json_response(response: McpResponse, session_id: &str) -> Response {
    let mut response = (StatusCode::OK, Json(response)).into_response();
    insert_session_header(&mut response, session_id);
    response
}

fn insert_session_header(response: &mut Response, session_id: &str) {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
}

fn check_session_header(headers: &HeaderMap, session_id: &str) -> Option<Response> {
    match headers.get(MCP_SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) {
        None => Some(json_rpc_error(
            StatusCode::BAD_REQUEST,
            McpError::ServerError("Bad Request: Mcp-Session-Id header is required".to_string()),
        )),
        Some(received) if received != session_id => Some(json_rpc_error(
            StatusCode::NOT_FOUND,
            McpError::ServerError("Session not found".to_string()),
        )),
        Some(_) => None,
    }
}

fn method_not_allowed() -> Response {
    let mut response = json_rpc_error(
        StatusCode::METHOD_NOT_ALLOWED,
        McpError::ServerError("Method not allowed.".to_string()),
    );
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
    response
}

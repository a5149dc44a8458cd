//! HTTP client for end-to-end tests
//!
//! This module wraps reqwest and speaks JSON-RPC to the `/mcp` endpoint.
//!
//! When routes or request formats change, update only this file.

use super::constants::*;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP test client for the MCP endpoint
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    next_id: AtomicI64,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            next_id: AtomicI64::new(1),
        }
    }

    fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base_url)
    }

    fn with_headers(
        builder: RequestBuilder,
        session_id: Option<&str>,
        token: Option<&str>,
    ) -> RequestBuilder {
        let builder = match session_id {
            Some(id) => builder.header(SESSION_HEADER, id),
            None => builder,
        };
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // ========================================================================
    // Raw Endpoints
    // ========================================================================

    /// GET /
    pub async fn home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Home request failed")
    }

    /// POST /mcp with an arbitrary body
    pub async fn post_mcp(
        &self,
        body: &Value,
        session_id: Option<&str>,
        token: Option<&str>,
    ) -> Response {
        Self::with_headers(self.client.post(self.mcp_url()), session_id, token)
            .header("accept", "application/json, text/event-stream")
            .json(body)
            .send()
            .await
            .expect("POST /mcp failed")
    }

    /// GET /mcp asking for an event stream
    pub async fn get_mcp(&self, session_id: Option<&str>) -> Response {
        Self::with_headers(self.client.get(self.mcp_url()), session_id, None)
            .header("accept", "text/event-stream")
            .send()
            .await
            .expect("GET /mcp failed")
    }

    /// DELETE /mcp
    pub async fn delete_mcp(&self, session_id: Option<&str>) -> Response {
        Self::with_headers(self.client.delete(self.mcp_url()), session_id, None)
            .send()
            .await
            .expect("DELETE /mcp failed")
    }

    // ========================================================================
    // JSON-RPC Helpers
    // ========================================================================

    pub fn request_body(&self, method: &str, params: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::SeqCst),
            "method": method,
            "params": params,
        })
    }

    pub fn initialize_body(&self) -> Value {
        self.request_body(
            "initialize",
            json!({
                "protocolVersion": CLIENT_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "e2e-tests", "version": "0.0.0" }
            }),
        )
    }

    /// POST an initialize request without a session header
    pub async fn initialize(&self, token: Option<&str>) -> Response {
        let body = self.initialize_body();
        self.post_mcp(&body, None, token).await
    }

    /// Initialize a session and return its id
    ///
    /// # Panics
    ///
    /// Panics if initialization fails.
    pub async fn initialize_session(&self, token: Option<&str>) -> String {
        let response = self.initialize(token).await;
        if response.status() != StatusCode::OK {
            panic!(
                "Initialize failed with {}: {:?}",
                response.status(),
                response.text().await
            );
        }
        response
            .headers()
            .get(SESSION_HEADER)
            .expect("Initialize response carries no session id")
            .to_str()
            .expect("Session id is not ASCII")
            .to_string()
    }

    /// Send one JSON-RPC request on a session and return the parsed envelope
    pub async fn call(
        &self,
        session_id: &str,
        token: Option<&str>,
        method: &str,
        params: Value,
    ) -> Value {
        let body = self.request_body(method, params);
        let response = self.post_mcp(&body, Some(session_id), token).await;
        assert_eq!(response.status(), StatusCode::OK, "{} failed", method);
        response.json().await.expect("Response is not JSON")
    }
}

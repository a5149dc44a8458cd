//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own session manager.

use super::constants::*;
use cms_mcp_server::auth::{Permission, StaticToken, StaticTokenAuthenticator, TokenAuthenticator};
use cms_mcp_server::config::McpSettings;
use cms_mcp_server::mcp::McpState;
use cms_mcp_server::server::state::{GuardedMcpState, ServerState};
use cms_mcp_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Test server instance with an isolated MCP state
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// MCP state for direct inspection in tests
    pub mcp_state: GuardedMcpState,

    // Private fields - keep resources alive until drop
    _cleanup_task: JoinHandle<()>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Dev mode and MCP on, default limits, the test token table.
pub fn default_settings() -> McpSettings {
    McpSettings {
        enabled: true,
        auto_reload: true,
        tokens: test_tokens(),
        ..Default::default()
    }
}

fn test_tokens() -> Vec<StaticToken> {
    vec![
        StaticToken {
            token: EDITOR_TOKEN.to_string(),
            caller_id: EDITOR_ID.to_string(),
            expires_at: None,
            permissions: vec![Permission::new("content.create")],
        },
        StaticToken {
            token: READER_TOKEN.to_string(),
            caller_id: "reader-1".to_string(),
            expires_at: None,
            permissions: vec![],
        },
        StaticToken {
            token: EXPIRED_TOKEN.to_string(),
            caller_id: "former-editor".to_string(),
            expires_at: Some(1),
            permissions: vec![Permission::new("content.create")],
        },
    ]
}

impl TestServer {
    /// Spawns a new test server on a random port with default settings
    pub async fn spawn() -> Self {
        Self::spawn_with(default_settings()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Builds the MCP state with the built-in capabilities
    /// 2. Binds to a random port (127.0.0.1:0)
    /// 3. Spawns the server and the idle sweep in background tasks
    /// 4. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the server doesn't become ready
    /// within timeout.
    pub async fn spawn_with(settings: McpSettings) -> Self {
        let authenticator: Option<Arc<dyn TokenAuthenticator>> = if settings.tokens.is_empty() {
            None
        } else {
            Some(Arc::new(StaticTokenAuthenticator::new(
                settings.tokens.clone(),
            )))
        };
        let cleanup_interval = Duration::from_millis(settings.cleanup_interval_ms);
        let mcp_state: GuardedMcpState = Arc::new(
            McpState::with_builtins(settings, authenticator)
                .expect("Failed to build MCP state"),
        );

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            metrics_port: 0,
        };
        let app = make_app(ServerState::new(config, mcp_state.clone()));

        let cleanup_task = mcp_state.sessions.spawn_cleanup_task(cleanup_interval);

        // Spawn server in background task with graceful shutdown
        let shutdown_state = mcp_state.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                    shutdown_state.sessions.close_all_sessions().await;
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            mcp_state,
            _cleanup_task: cleanup_task,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Number of live MCP sessions
    pub fn active_sessions(&self) -> usize {
        self.mcp_state.sessions.size()
    }

    /// Number of protocol servers the factory built
    pub fn servers_created(&self) -> usize {
        self.mcp_state.factory.servers_created()
    }

    /// Waits for the server to become ready by polling the / endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    // Server is ready
                    return;
                }
                _ => {
                    // Server not ready yet, wait and retry
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self._cleanup_task.abort();
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

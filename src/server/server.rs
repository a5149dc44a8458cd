use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State, middleware, response::IntoResponse, routing::get, Json, Router,
};
use serde::Serialize;
use tracing::{error, info, warn};

use super::metrics::metrics_handler;
use super::state::ServerState;
use super::{log_requests, ServerConfig};
use crate::auth::TokenAuthenticator;
use crate::config::AppConfig;
use crate::mcp::{mcp_routes, McpState};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub mcp_enabled: bool,
    pub active_sessions: usize,
}

pub fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        mcp_enabled: state.mcp_state.settings.is_enabled(),
        active_sessions: state.mcp_state.sessions.size(),
    };
    Json(stats)
}

pub fn make_app(state: ServerState) -> Router {
    let mut app: Router<ServerState> = Router::new().route("/", get(home));

    let settings = &state.mcp_state.settings;
    if settings.is_enabled() {
        app = app.merge(mcp_routes(settings));
    }

    app.layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

/// Resolves on Ctrl-C. Never resolves if the signal handler can't be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Close every MCP session and log what failed.
pub async fn close_mcp_sessions(mcp_state: &McpState) {
    let summary = mcp_state.sessions.close_all_sessions().await;
    if summary.has_errors {
        for message in &summary.errored_session_messages {
            warn!("Error while closing MCP session: {}", message);
        }
    }
}

pub async fn run_server(
    config: AppConfig,
    authenticator: Option<Arc<dyn TokenAuthenticator>>,
) -> Result<()> {
    let mcp_state = Arc::new(
        McpState::with_builtins(config.mcp.clone(), authenticator)
            .context("Failed to define built-in MCP capabilities")?,
    );
    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
    };
    let app = make_app(ServerState::new(server_config, mcp_state.clone()));

    let cleanup_task = if mcp_state.settings.is_enabled() {
        info!(
            "MCP endpoint enabled at {} (max {} sessions, idle timeout {}ms)",
            mcp_state.settings.path(),
            mcp_state.settings.max_sessions,
            mcp_state.settings.session_idle_timeout_ms
        );
        Some(
            mcp_state
                .sessions
                .spawn_cleanup_task(Duration::from_millis(mcp_state.settings.cleanup_interval_ms)),
        )
    } else {
        info!("MCP endpoint disabled");
        None
    };

    let metrics_listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", config.metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", config.metrics_port))?;
    let metrics_app = Router::new().route("/metrics", get(metrics_handler));
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    // SSE streams only end when their session closes.
    let shutdown_state = mcp_state.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if let Some(task) = cleanup_task {
                task.abort();
            }
            close_mcp_sessions(&shutdown_state).await;
        })
        .await;

    metrics_server.abort();
    info!("Server stopped");
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::McpSettings;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn app_with(settings: McpSettings) -> Router {
        let mcp_state = Arc::new(McpState::with_builtins(settings, None).unwrap());
        make_app(ServerState::new(ServerConfig::default(), mcp_state))
    }

    fn enabled_settings() -> McpSettings {
        McpSettings {
            enabled: true,
            auto_reload: true,
            ..Default::default()
        }
    }

    #[test]
    fn formats_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0d 00:00:00");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 01:01:01");
    }

    #[tokio::test]
    async fn home_reports_stats() {
        let app = app_with(enabled_settings());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stats["mcp_enabled"], true);
        assert_eq!(stats["active_sessions"], 0);
    }

    #[tokio::test]
    async fn mcp_routes_absent_when_disabled() {
        let settings = McpSettings {
            enabled: true,
            auto_reload: false,
            ..Default::default()
        };
        let app = app_with(settings);
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mcp_routes_reject_unsupported_methods() {
        let app = app_with(enabled_settings());
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn delete_without_session_header_is_rejected() {
        let app = app_with(enabled_settings());
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Bad Request: Session ID required");
        assert!(body["id"].is_null());
    }
}

mod file_config;

pub use file_config::{FileConfig, McpFileConfig, ServerFileConfig};

use crate::auth::StaticToken;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use tracing::warn;

/// The only path the MCP endpoint is served on.
pub const MCP_PATH: &str = "/mcp";

pub const DEFAULT_SESSION_IDLE_TIMEOUT_MS: u64 = 1_800_000;
pub const DEFAULT_MAX_SESSIONS: usize = 100;
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Auto-reload / development flag.
    pub dev: bool,
    pub mcp_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub mcp: McpSettings,
}

/// Immutable MCP runtime parameters.
#[derive(Debug, Clone)]
pub struct McpSettings {
    pub enabled: bool,
    pub auto_reload: bool,
    pub session_idle_timeout_ms: u64,
    pub max_sessions: usize,
    pub cleanup_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub tokens: Vec<StaticToken>,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_reload: false,
            session_idle_timeout_ms: DEFAULT_SESSION_IDLE_TIMEOUT_MS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            tokens: Vec::new(),
        }
    }
}

impl McpSettings {
    /// Always `/mcp`; a configured path is ignored.
    pub fn path(&self) -> &'static str {
        MCP_PATH
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.auto_reload
    }

    pub fn is_dev_mode(&self) -> bool {
        self.auto_reload
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let server_file = file.server.clone().unwrap_or_default();
        let mcp_file = server_file.mcp.clone().unwrap_or_default();

        let port = server_file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .as_deref()
            .and_then(parse_logging_level)
            .unwrap_or_else(|| cli.logging_level.clone());

        if let Some(path) = mcp_file.path.as_deref().filter(|p| *p != MCP_PATH) {
            warn!(
                "server.mcp.path is set to {:?} but the MCP endpoint is always served on {}",
                path, MCP_PATH
            );
        }

        let mcp = McpSettings {
            enabled: mcp_file.enabled.unwrap_or(cli.mcp_enabled),
            auto_reload: file.auto_reload.unwrap_or(cli.dev),
            session_idle_timeout_ms: mcp_file
                .session_idle_timeout_ms
                .unwrap_or(DEFAULT_SESSION_IDLE_TIMEOUT_MS),
            max_sessions: mcp_file.max_sessions.unwrap_or(DEFAULT_MAX_SESSIONS),
            cleanup_interval_ms: mcp_file
                .cleanup_interval_ms
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL_MS),
            request_timeout_ms: mcp_file
                .request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            tokens: mcp_file.tokens,
        };

        if mcp.max_sessions == 0 {
            bail!("server.mcp.max_sessions must be greater than zero");
        }
        if mcp.session_idle_timeout_ms == 0 {
            bail!("server.mcp.session_idle_timeout_ms must be greater than zero");
        }
        if mcp.cleanup_interval_ms == 0 {
            bail!("server.mcp.cleanup_interval_ms must be greater than zero");
        }
        if mcp.request_timeout_ms == 0 {
            bail!("server.mcp.request_timeout_ms must be greater than zero");
        }

        Ok(Self {
            port,
            metrics_port,
            logging_level,
            mcp,
        })
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

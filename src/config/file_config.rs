use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::auth::StaticToken;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub auto_reload: Option<bool>,
    pub logging_level: Option<String>,
    pub metrics_port: Option<u16>,

    pub server: Option<ServerFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    pub mcp: Option<McpFileConfig>,
}

/// `[server.mcp]` section. Keys are accepted in snake_case or camelCase.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct McpFileConfig {
    pub enabled: Option<bool>,
    /// Read but not honoured, the endpoint is always `/mcp`.
    pub path: Option<String>,
    #[serde(alias = "sessionIdleTimeoutMs")]
    pub session_idle_timeout_ms: Option<u64>,
    #[serde(alias = "maxSessions")]
    pub max_sessions: Option<usize>,
    #[serde(alias = "cleanupIntervalMs")]
    pub cleanup_interval_ms: Option<u64>,
    #[serde(alias = "requestTimeoutMs")]
    pub request_timeout_ms: Option<u64>,
    pub tokens: Vec<StaticToken>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn mcp(&self) -> Option<&McpFileConfig> {
        self.server.as_ref().and_then(|s| s.mcp.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_snake_case_keys() {
        let config = FileConfig::parse(
            r#"
            auto_reload = true
            metrics_port = 9100

            [server]
            port = 8080

            [server.mcp]
            enabled = true
            session_idle_timeout_ms = 1000
            max_sessions = 5
            cleanup_interval_ms = 2000
            request_timeout_ms = 3000
            "#,
        )
        .unwrap();

        assert_eq!(config.auto_reload, Some(true));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.server.as_ref().unwrap().port, Some(8080));
        let mcp = config.mcp().unwrap();
        assert_eq!(mcp.enabled, Some(true));
        assert_eq!(mcp.session_idle_timeout_ms, Some(1000));
        assert_eq!(mcp.max_sessions, Some(5));
        assert_eq!(mcp.cleanup_interval_ms, Some(2000));
        assert_eq!(mcp.request_timeout_ms, Some(3000));
    }

    #[test]
    fn test_parse_camel_case_aliases_and_tokens() {
        let config = FileConfig::parse(
            r#"
            [server.mcp]
            sessionIdleTimeoutMs = 10
            maxSessions = 2
            cleanupIntervalMs = 20
            requestTimeoutMs = 30

            [[server.mcp.tokens]]
            token = "abc"
            caller_id = "editor-1"
            expires_at = 1900000000
            permissions = [{ action = "content.create", subject = "article" }]
            "#,
        )
        .unwrap();

        let mcp = config.mcp().unwrap();
        assert_eq!(mcp.session_idle_timeout_ms, Some(10));
        assert_eq!(mcp.max_sessions, Some(2));
        assert_eq!(mcp.cleanup_interval_ms, Some(20));
        assert_eq!(mcp.request_timeout_ms, Some(30));
        assert_eq!(mcp.tokens.len(), 1);
        assert_eq!(mcp.tokens[0].caller_id, "editor-1");
        assert_eq!(mcp.tokens[0].expires_at, Some(1_900_000_000));
        assert_eq!(
            mcp.tokens[0].permissions[0].subject.as_deref(),
            Some("article")
        );
    }

    #[test]
    fn test_empty_file_is_valid() {
        let config = FileConfig::parse("").unwrap();
        assert!(config.server.is_none());
        assert!(config.mcp().is_none());
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "logging_level = \"body\"").unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.logging_level.as_deref(), Some("body"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = FileConfig::load(Path::new("/nonexistent/cms-mcp.toml"));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to read config file"));
    }
}

//! Config Resource
//!
//! Read-only view of the MCP settings. Tokens are never exposed.

use serde::Serialize;

use crate::config::McpSettings;
use crate::mcp::capability::{ResourceBuilder, ResourceDefinition};
use crate::mcp::error::CapabilityError;
use crate::mcp::protocol::{McpError, ResourceContent};
use crate::mcp::registry::DefinitionSet;

pub const CONFIG_URI: &str = "config://mcp";

pub fn register_resources(
    definitions: &mut DefinitionSet,
    settings: &McpSettings,
) -> Result<(), CapabilityError> {
    definitions.define(config_resource(settings))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct McpConfigView {
    enabled: bool,
    dev_mode: bool,
    path: String,
    session_idle_timeout_ms: u64,
    max_sessions: usize,
    cleanup_interval_ms: u64,
    request_timeout_ms: u64,
    configured_tokens: usize,
}

impl From<&McpSettings> for McpConfigView {
    fn from(settings: &McpSettings) -> Self {
        Self {
            enabled: settings.is_enabled(),
            dev_mode: settings.is_dev_mode(),
            path: settings.path().to_string(),
            session_idle_timeout_ms: settings.session_idle_timeout_ms,
            max_sessions: settings.max_sessions,
            cleanup_interval_ms: settings.cleanup_interval_ms,
            request_timeout_ms: settings.request_timeout_ms,
            configured_tokens: settings.tokens.len(),
        }
    }
}

fn config_resource(settings: &McpSettings) -> ResourceDefinition {
    let view = McpConfigView::from(settings);
    ResourceBuilder::new("mcp_config", CONFIG_URI)
        .title("MCP Configuration")
        .description("Effective MCP session and timeout settings")
        .mime_type("application/json")
        .dev_mode_only()
        .build(move |_request, uri| {
            let rendered = serde_json::to_string_pretty(&view);
            async move {
                let text = rendered.map_err(|e| McpError::InternalError(e.to_string()))?;
                Ok(vec![ResourceContent::Text {
                    uri,
                    mime_type: Some("application/json".to_string()),
                    text,
                }])
            }
        })
}

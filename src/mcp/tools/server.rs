//! Server Tools
//!
//! Introspection of the protocol server a session is bound to.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::mcp::capability::{ServerContext, ToolBuilder, ToolDefinition, ToolHandler};
use crate::mcp::error::CapabilityError;
use crate::mcp::protocol::{McpError, ToolsCallResult};
use crate::mcp::registry::DefinitionSet;
use crate::server::format_uptime;

pub fn register_tools(definitions: &mut DefinitionSet) -> Result<(), CapabilityError> {
    definitions.define(server_info_tool())
}

// ============================================================================
// server_info
// ============================================================================

#[derive(Debug, Serialize)]
struct ServerInfoResult {
    name: String,
    version: String,
    dev_mode: bool,
    uptime: String,
    uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

fn server_info_tool() -> ToolDefinition {
    ToolBuilder::new("server_info")
        .title("Server Info")
        .description("Name, version, dev mode flag and uptime of this MCP server")
        .dev_mode_only()
        .output_schema(json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "version": { "type": "string" },
                "dev_mode": { "type": "boolean" },
                "uptime": { "type": "string" },
                "uptime_seconds": { "type": "integer" },
                "session_id": { "type": "string" }
            },
            "required": ["name", "version", "dev_mode", "uptime", "uptime_seconds"]
        }))
        .build_with(|server: &ServerContext| {
            let server = server.clone();
            let handler: ToolHandler = Arc::new(move |request, _params| {
                let elapsed = server.started_at.elapsed();
                let result = ServerInfoResult {
                    name: server.info.name.clone(),
                    version: server.info.version.clone(),
                    dev_mode: server.dev_mode,
                    uptime: format_uptime(elapsed),
                    uptime_seconds: elapsed.as_secs(),
                    session_id: request.session_id,
                };
                Box::pin(async move {
                    ToolsCallResult::json(&result).map_err(|e| McpError::InternalError(e.to_string()))
                })
            });
            handler
        })
}

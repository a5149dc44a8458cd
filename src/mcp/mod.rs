//! MCP (Model Context Protocol) Server
//!
//! Embeds an MCP endpoint into the CMS HTTP server. Each client gets its own
//! session with a dedicated protocol server, transport and capability
//! registries, built from one shared set of capability definitions.
//!
//! ## Architecture
//!
//! - Transport: streamable HTTP at `/mcp` (`POST`, `GET` for SSE, `DELETE`)
//! - Sessions: `mcp-session-id` header, idle reaping, session ceiling
//! - Capabilities: tools, prompts and resources, opt-in per server; dev-mode
//!   ones enabled in dev mode, auth-gated ones for callers that qualify

pub mod capability;
pub mod error;
pub mod factory;
pub mod handler;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod server;
pub mod session;
pub mod timeout;
pub mod tools;
pub mod transport;

pub use capability::{
    Capability, CapabilityKind, PromptBuilder, ResourceBuilder, RequestContext, ServerContext,
    ToolBuilder,
};
pub use error::{CapabilityError, RequestError, TransportError};
pub use factory::{create_server_with_registries, ServerFactory, ServerOptions};
pub use handler::{mcp_routes, McpState};
pub use protocol::{McpError, McpRequest, McpResponse, ServerInfo};
pub use registry::{CapabilityRegistries, CapabilityRegistry, CapabilityStatus, DefinitionSet};
pub use session::{CloseSummary, Session, SessionManager};
pub use timeout::with_timeout;
pub use transport::{StreamableHttpTransport, Transport, TransportOptions};

use crate::config::McpSettings;

/// All built-in tool, prompt and resource definitions.
pub fn builtin_definitions(settings: &McpSettings) -> Result<DefinitionSet, CapabilityError> {
    let mut definitions = DefinitionSet::new();
    tools::register_all_tools(&mut definitions)?;
    prompts::register_all_prompts(&mut definitions)?;
    resources::register_all_resources(&mut definitions, settings)?;
    Ok(definitions)
}

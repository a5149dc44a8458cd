//! MCP Tools
//!
//! Built-in tool definitions.

pub mod server;

use super::error::CapabilityError;
use super::registry::DefinitionSet;

/// Define all built-in tools
pub fn register_all_tools(definitions: &mut DefinitionSet) -> Result<(), CapabilityError> {
    server::register_tools(definitions)
}

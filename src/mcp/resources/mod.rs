//! MCP Resources
//!
//! Built-in resource definitions.

pub mod config;

use super::error::CapabilityError;
use super::registry::DefinitionSet;
use crate::config::McpSettings;

/// Define all built-in resources
pub fn register_all_resources(
    definitions: &mut DefinitionSet,
    settings: &McpSettings,
) -> Result<(), CapabilityError> {
    config::register_resources(definitions, settings)
}

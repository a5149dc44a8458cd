//! Server factory
//!
//! Builds one protocol server plus its three capability registries from a
//! shared [`DefinitionSet`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::capability::ServerContext;
use super::error::CapabilityError;
use super::protocol::{
    ListChangedCapability, ResourcesCapability, ServerCapabilities, ServerInfo,
};
use super::registry::{CapabilityRegistries, DefinitionSet};
use super::server::McpServer;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub is_dev_mode: bool,
    pub info: ServerInfo,
}

/// Capability groups to advertise: only kinds with at least one definition.
pub fn advertised_capabilities(definitions: &DefinitionSet) -> ServerCapabilities {
    let list_changed = || ListChangedCapability {
        list_changed: Some(true),
    };
    ServerCapabilities {
        tools: (!definitions.tools.is_empty()).then(list_changed),
        prompts: (!definitions.prompts.is_empty()).then(list_changed),
        resources: (!definitions.resources.is_empty()).then(|| ResourcesCapability {
            subscribe: None,
            list_changed: Some(true),
        }),
    }
}

/// Create a server and bind every definition to it. All capabilities start
/// disabled; in dev mode the dev-mode-only ones that need no auth are enabled.
pub fn create_server_with_registries(
    definitions: &DefinitionSet,
    options: &ServerOptions,
) -> Result<(Arc<McpServer>, CapabilityRegistries), CapabilityError> {
    let server = Arc::new(McpServer::new(
        ServerContext {
            info: options.info.clone(),
            dev_mode: options.is_dev_mode,
            started_at: Instant::now(),
        },
        advertised_capabilities(definitions),
    ));

    let mut registries = CapabilityRegistries::new(definitions);
    registries.tools.register(|d| server.bind(d))?;
    registries.prompts.register(|d| server.bind(d))?;
    registries.resources.register(|d| server.bind(d))?;

    if options.is_dev_mode {
        let enabled: Vec<String> = registries
            .tools
            .enable_dev_mode_capabilities()
            .into_iter()
            .chain(registries.prompts.enable_dev_mode_capabilities())
            .chain(registries.resources.enable_dev_mode_capabilities())
            .collect();
        debug!("Dev mode enabled capabilities: {:?}", enabled);
    }

    Ok((server, registries))
}

/// Creates servers for new sessions from one immutable definition set.
pub struct ServerFactory {
    definitions: Arc<DefinitionSet>,
    options: ServerOptions,
    created: AtomicUsize,
}

impl ServerFactory {
    pub fn new(definitions: Arc<DefinitionSet>, options: ServerOptions) -> Self {
        Self {
            definitions,
            options,
            created: AtomicUsize::new(0),
        }
    }

    pub fn create(&self) -> Result<(Arc<McpServer>, CapabilityRegistries), CapabilityError> {
        let created = create_server_with_registries(&self.definitions, &self.options)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    /// Number of servers created so far.
    pub fn servers_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn definitions(&self) -> &DefinitionSet {
        &self.definitions
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::capability::{PromptBuilder, ToolBuilder};
    use crate::mcp::protocol::{PromptsGetResult, ToolsCallResult};
    use crate::mcp::registry::CapabilityStatus;

    fn options(is_dev_mode: bool) -> ServerOptions {
        ServerOptions {
            is_dev_mode,
            info: ServerInfo {
                name: "test".to_string(),
                version: "0.0.0".to_string(),
            },
        }
    }

    fn definitions() -> DefinitionSet {
        let mut set = DefinitionSet::new();
        set.define(
            ToolBuilder::new("debug_dump")
                .dev_mode_only()
                .build(|_, _| async { Ok(ToolsCallResult::text("dump")) }),
        )
        .unwrap();
        set.define(
            ToolBuilder::new("dev_and_gated")
                .dev_mode_only()
                .requires("admin")
                .build(|_, _| async { Ok(ToolsCallResult::text("gated")) }),
        )
        .unwrap();
        set.define(
            PromptBuilder::new("gated")
                .requires("content.read")
                .build(|_, _| async {
                    Ok(PromptsGetResult {
                        description: None,
                        messages: vec![],
                    })
                }),
        )
        .unwrap();
        set
    }

    #[test]
    fn test_dev_mode_enables_dev_only_capabilities() {
        let (_server, registries) =
            create_server_with_registries(&definitions(), &options(true)).unwrap();

        assert_eq!(
            registries.tools.status("debug_dump"),
            CapabilityStatus::Enabled
        );
        assert_eq!(
            registries.tools.status("dev_and_gated"),
            CapabilityStatus::Disabled
        );
        assert_eq!(registries.prompts.status("gated"), CapabilityStatus::Disabled);
    }

    #[test]
    fn test_production_mode_keeps_everything_disabled() {
        let (_server, registries) =
            create_server_with_registries(&definitions(), &options(false)).unwrap();

        assert_eq!(
            registries.tools.status("debug_dump"),
            CapabilityStatus::Disabled
        );
    }

    #[test]
    fn test_only_defined_groups_are_advertised() {
        let (server, _registries) =
            create_server_with_registries(&definitions(), &options(false)).unwrap();
        let caps = server.capabilities();
        assert!(caps.tools.is_some());
        assert!(caps.prompts.is_some());
        assert!(caps.resources.is_none());

        let empty = advertised_capabilities(&DefinitionSet::new());
        assert_eq!(empty, ServerCapabilities::default());
    }

    #[test]
    fn test_servers_do_not_share_state() {
        let factory = ServerFactory::new(Arc::new(definitions()), options(true));
        let (_a, first) = factory.create().unwrap();
        let (_b, second) = factory.create().unwrap();

        first.tools.disable("debug_dump").unwrap();
        assert_eq!(first.tools.status("debug_dump"), CapabilityStatus::Disabled);
        assert_eq!(second.tools.status("debug_dump"), CapabilityStatus::Enabled);
        assert_eq!(factory.servers_created(), 2);
    }
}

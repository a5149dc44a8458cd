//! MCP protocol server
//!
//! One `McpServer` exists per session. Capabilities are bound to it through
//! per-kind [`BindingTable`]s; the server dispatches JSON-RPC requests to the
//! enabled bindings the caller is permitted to use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::capability::{
    Capability, PromptDefinition, RequestContext, ResourceDefinition, ServerContext,
    ToolDefinition,
};
use super::error::CapabilityError;
use super::protocol::{
    methods, InitializeParams, InitializeResult, McpError, McpNotification, McpRequest,
    McpResponse, PingResult, PromptInfo, PromptsGetParams, PromptsListResult, ResourceInfo,
    ResourcesListResult, ResourcesReadParams, ResourcesReadResult, ServerCapabilities, ToolInfo,
    ToolsCallParams, ToolsListResult, MCP_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};

const NOTIFICATION_BUFFER: usize = 64;

// ============================================================================
// Binding Table
// ============================================================================

struct Binding<D: Capability> {
    definition: Arc<D>,
    handler: D::Handler,
    enabled: bool,
}

/// Live bindings of one capability kind on one server.
pub struct BindingTable<D: Capability> {
    bindings: RwLock<Vec<Binding<D>>>,
    notifications: broadcast::Sender<McpNotification>,
}

impl<D: Capability> BindingTable<D> {
    fn new(notifications: broadcast::Sender<McpNotification>) -> Self {
        Self {
            bindings: RwLock::new(Vec::new()),
            notifications,
        }
    }

    fn insert(&self, definition: Arc<D>, handler: D::Handler) -> Result<(), CapabilityError> {
        {
            let mut bindings = self.bindings.write();
            if bindings.iter().any(|b| b.definition.name() == definition.name()) {
                return Err(CapabilityError::AlreadyRegistered {
                    kind: D::KIND,
                    name: definition.name().to_string(),
                });
            }
            bindings.push(Binding {
                definition,
                handler,
                enabled: true,
            });
        }
        self.notify_list_changed();
        Ok(())
    }

    /// Returns false when no binding has that name.
    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let changed = {
            let mut bindings = self.bindings.write();
            match bindings.iter_mut().find(|b| b.definition.name() == name) {
                Some(binding) if binding.enabled != enabled => {
                    binding.enabled = enabled;
                    true
                }
                Some(_) => false,
                None => return false,
            }
        };
        if changed {
            self.notify_list_changed();
        }
        true
    }

    fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut bindings = self.bindings.write();
            let before = bindings.len();
            bindings.retain(|b| b.definition.name() != name);
            bindings.len() != before
        };
        if removed {
            self.notify_list_changed();
        }
        removed
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.bindings
            .read()
            .iter()
            .any(|b| b.enabled && b.definition.name() == name)
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Snapshot of the enabled definitions.
    fn enabled_definitions(&self) -> Vec<Arc<D>> {
        self.bindings
            .read()
            .iter()
            .filter(|b| b.enabled)
            .map(|b| b.definition.clone())
            .collect()
    }

    /// First binding matching `predicate`, with its handler and enabled flag.
    fn find<P>(&self, predicate: P) -> Option<(Arc<D>, D::Handler, bool)>
    where
        P: Fn(&D) -> bool,
    {
        self.bindings
            .read()
            .iter()
            .find(|b| predicate(&b.definition))
            .map(|b| (b.definition.clone(), b.handler.clone(), b.enabled))
    }

    fn notify_list_changed(&self) {
        // No subscriber is fine.
        let _ = self
            .notifications
            .send(McpNotification::new(D::KIND.list_changed_method()));
    }
}

// ============================================================================
// Registered Capability
// ============================================================================

/// Handle to one definition bound to one server.
pub struct RegisteredCapability<D: Capability> {
    definition: Arc<D>,
    table: Arc<BindingTable<D>>,
}

impl<D: Capability> RegisteredCapability<D> {
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &Arc<D> {
        &self.definition
    }

    pub fn enable(&self) {
        self.table.set_enabled(self.name(), true);
    }

    pub fn disable(&self) {
        self.table.set_enabled(self.name(), false);
    }

    pub fn is_enabled(&self) -> bool {
        self.table.is_enabled(self.name())
    }

    /// Detach the binding from its server permanently.
    pub fn remove(self) {
        self.table.remove(self.name());
    }
}

// ============================================================================
// Server
// ============================================================================

pub struct McpServer {
    context: ServerContext,
    capabilities: ServerCapabilities,
    tools: Arc<BindingTable<ToolDefinition>>,
    prompts: Arc<BindingTable<PromptDefinition>>,
    resources: Arc<BindingTable<ResourceDefinition>>,
    notifications: broadcast::Sender<McpNotification>,
    initialized: AtomicBool,
    closed: watch::Sender<bool>,
}

impl McpServer {
    pub fn new(context: ServerContext, capabilities: ServerCapabilities) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let (closed, _) = watch::channel(false);
        Self {
            context,
            capabilities,
            tools: Arc::new(BindingTable::new(notifications.clone())),
            prompts: Arc::new(BindingTable::new(notifications.clone())),
            resources: Arc::new(BindingTable::new(notifications.clone())),
            notifications,
            initialized: AtomicBool::new(false),
            closed,
        }
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub(crate) fn tool_bindings(&self) -> &Arc<BindingTable<ToolDefinition>> {
        &self.tools
    }

    pub(crate) fn prompt_bindings(&self) -> &Arc<BindingTable<PromptDefinition>> {
        &self.prompts
    }

    pub(crate) fn resource_bindings(&self) -> &Arc<BindingTable<ResourceDefinition>> {
        &self.resources
    }

    /// Bind `definition` to this server. New bindings start enabled.
    pub fn bind<D: Capability>(
        &self,
        definition: &Arc<D>,
    ) -> Result<RegisteredCapability<D>, CapabilityError> {
        let table = D::bindings(self);
        let handler = definition.make_handler(&self.context);
        table.insert(definition.clone(), handler)?;
        Ok(RegisteredCapability {
            definition: definition.clone(),
            table: table.clone(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Server-initiated notifications, such as list changes.
    pub fn subscribe(&self) -> broadcast::Receiver<McpNotification> {
        self.notifications.subscribe()
    }

    /// Flips to `true` once the server is closed.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Close the server. Calling it again is a no-op.
    pub async fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!("MCP server closed");
        }
    }

    /// Handle one JSON-RPC message. Notifications produce no response.
    pub async fn handle_message(
        &self,
        request: McpRequest,
        ctx: RequestContext,
    ) -> Option<McpResponse> {
        let Some(request_id) = request.id.clone() else {
            if request.method == methods::INITIALIZED {
                debug!("Client reported initialization complete");
            }
            return None;
        };

        if self.is_closed() {
            return Some(McpResponse::error(
                Some(request_id),
                McpError::ServerError("Server is closed".to_string()),
            ));
        }

        let result = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(&request),
            methods::PING => to_json(PingResult {}),
            method @ (methods::TOOLS_LIST
            | methods::TOOLS_CALL
            | methods::PROMPTS_LIST
            | methods::PROMPTS_GET
            | methods::RESOURCES_LIST
            | methods::RESOURCES_READ)
                if !self.is_initialized() =>
            {
                debug!("Rejecting {} before initialize", method);
                Err(McpError::InvalidRequest("Not initialized".to_string()))
            }
            methods::TOOLS_LIST => self.handle_tools_list(&ctx),
            methods::TOOLS_CALL => self.handle_tools_call(&request, ctx).await,
            methods::PROMPTS_LIST => self.handle_prompts_list(&ctx),
            methods::PROMPTS_GET => self.handle_prompts_get(&request, ctx).await,
            methods::RESOURCES_LIST => self.handle_resources_list(&ctx),
            methods::RESOURCES_READ => self.handle_resources_read(&request, ctx).await,
            other => Err(McpError::MethodNotFound(other.to_string())),
        };

        Some(match result {
            Ok(value) => McpResponse::success(request_id, value),
            Err(error) => McpResponse::error(Some(request_id), error),
        })
    }

    fn handle_initialize(&self, request: &McpRequest) -> Result<Value, McpError> {
        let params: InitializeParams = parse_params(request)?.unwrap_or_default();

        let protocol_version = params
            .protocol_version
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(&v.as_str()))
            .unwrap_or_else(|| MCP_PROTOCOL_VERSION.to_string());

        if let Some(client) = &params.client_info {
            debug!(
                "Initializing MCP session for {} {} (protocol {})",
                client.name, client.version, protocol_version
            );
        }

        self.initialized.store(true, Ordering::SeqCst);

        to_json(InitializeResult {
            protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.context.info.clone(),
        })
    }

    fn handle_tools_list(&self, ctx: &RequestContext) -> Result<Value, McpError> {
        let tools = self
            .tools
            .enabled_definitions()
            .into_iter()
            .filter(|d| d.meta.permits(ctx.caller.as_ref()))
            .map(|d| ToolInfo {
                name: d.meta.name.clone(),
                title: d.meta.title.clone(),
                description: d.meta.description.clone(),
                input_schema: d.input_schema.clone(),
                output_schema: d.output_schema.clone(),
            })
            .collect();

        to_json(ToolsListResult { tools })
    }

    async fn handle_tools_call(
        &self,
        request: &McpRequest,
        ctx: RequestContext,
    ) -> Result<Value, McpError> {
        let params: ToolsCallParams = required_params(request)?;

        let (definition, handler, enabled) = self
            .tools
            .find(|d| d.meta.name == params.name)
            .ok_or_else(|| McpError::MethodNotFound(format!("Unknown tool: {}", params.name)))?;
        if !enabled {
            return Err(McpError::InvalidParams(format!(
                "Tool {} disabled",
                params.name
            )));
        }
        if !definition.meta.permits(ctx.caller.as_ref()) {
            return Err(McpError::PermissionDenied(format!("tool {}", params.name)));
        }

        let arguments = params.arguments.unwrap_or(serde_json::json!({}));
        let result = handler(ctx, arguments).await?;

        to_json(result)
    }

    fn handle_prompts_list(&self, ctx: &RequestContext) -> Result<Value, McpError> {
        let prompts = self
            .prompts
            .enabled_definitions()
            .into_iter()
            .filter(|d| d.meta.permits(ctx.caller.as_ref()))
            .map(|d| PromptInfo {
                name: d.meta.name.clone(),
                title: d.meta.title.clone(),
                description: d.meta.description.clone(),
                arguments: d.arguments.clone(),
            })
            .collect();

        to_json(PromptsListResult { prompts })
    }

    async fn handle_prompts_get(
        &self,
        request: &McpRequest,
        ctx: RequestContext,
    ) -> Result<Value, McpError> {
        let params: PromptsGetParams = required_params(request)?;

        let (definition, handler, enabled) = self
            .prompts
            .find(|d| d.meta.name == params.name)
            .ok_or_else(|| {
                McpError::MethodNotFound(format!("Unknown prompt: {}", params.name))
            })?;
        if !enabled {
            return Err(McpError::InvalidParams(format!(
                "Prompt {} disabled",
                params.name
            )));
        }
        if !definition.meta.permits(ctx.caller.as_ref()) {
            return Err(McpError::PermissionDenied(format!("prompt {}", params.name)));
        }
        if let Some(missing) = definition
            .arguments
            .iter()
            .find(|arg| arg.required && !params.arguments.contains_key(&arg.name))
        {
            return Err(McpError::InvalidParams(format!(
                "Missing required argument: {}",
                missing.name
            )));
        }

        let result = handler(ctx, params.arguments).await?;

        to_json(result)
    }

    fn handle_resources_list(&self, ctx: &RequestContext) -> Result<Value, McpError> {
        let resources = self
            .resources
            .enabled_definitions()
            .into_iter()
            .filter(|d| d.meta.permits(ctx.caller.as_ref()))
            .map(|d| ResourceInfo {
                uri: d.uri.clone(),
                name: d.meta.name.clone(),
                title: d.meta.title.clone(),
                description: Some(d.meta.description.clone()).filter(|s| !s.is_empty()),
                mime_type: d.mime_type.clone(),
            })
            .collect();

        to_json(ResourcesListResult { resources })
    }

    async fn handle_resources_read(
        &self,
        request: &McpRequest,
        ctx: RequestContext,
    ) -> Result<Value, McpError> {
        let params: ResourcesReadParams = required_params(request)?;

        let (definition, handler, enabled) = self
            .resources
            .find(|d| matches_uri_pattern(&d.uri, &params.uri))
            .ok_or_else(|| McpError::ResourceNotFound(params.uri.clone()))?;
        if !enabled {
            return Err(McpError::InvalidParams(format!(
                "Resource {} disabled",
                params.uri
            )));
        }
        if !definition.meta.permits(ctx.caller.as_ref()) {
            return Err(McpError::PermissionDenied(format!("resource {}", params.uri)));
        }

        let contents = handler(ctx, params.uri).await?;

        to_json(ResourcesReadResult { contents })
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    request: &McpRequest,
) -> Result<Option<T>, McpError> {
    request
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn required_params<T: serde::de::DeserializeOwned>(request: &McpRequest) -> Result<T, McpError> {
    parse_params(request)?.ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError(e.to_string()))
}

/// Check if a URI matches a pattern with {param} placeholders
pub(crate) fn matches_uri_pattern(pattern: &str, uri: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let uri_parts: Vec<&str> = uri.split('/').collect();

    if pattern_parts.len() != uri_parts.len() {
        return false;
    }

    pattern_parts
        .iter()
        .zip(uri_parts.iter())
        .all(|(pattern_part, uri_part)| {
            (pattern_part.starts_with('{') && pattern_part.ends_with('}'))
                || pattern_part == uri_part
        })
}

//! Capability definitions
//!
//! A definition is the static, reusable description of a tool, prompt or
//! resource. It carries a handler factory that is invoked once per protocol
//! server the definition gets bound to.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use super::error::CapabilityError;
use super::protocol::{
    methods, McpError, PromptArgument, PromptsGetResult, ResourceContent, ServerInfo,
    ToolsCallResult,
};
use super::server::{BindingTable, McpServer};
use crate::auth::{AuthRequirement, Caller};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Prompt => "prompt",
            CapabilityKind::Resource => "resource",
        }
    }

    /// Notification method sent when the visible list of this kind changes.
    pub fn list_changed_method(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => methods::TOOLS_LIST_CHANGED,
            CapabilityKind::Prompt => methods::PROMPTS_LIST_CHANGED,
            CapabilityKind::Resource => methods::RESOURCES_LIST_CHANGED,
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every capability kind.
#[derive(Debug, Clone, Default)]
pub struct CapabilityMeta {
    pub name: String,
    pub title: Option<String>,
    pub description: String,
    pub dev_mode_only: bool,
    pub auth: Option<AuthRequirement>,
}

impl CapabilityMeta {
    pub fn requires_auth(&self) -> bool {
        self.auth.as_ref().is_some_and(|auth| !auth.is_empty())
    }

    /// A capability must be either dev-mode-only or gated by an auth requirement.
    pub fn validate(&self, kind: CapabilityKind) -> Result<(), CapabilityError> {
        if self.dev_mode_only || self.requires_auth() {
            Ok(())
        } else {
            Err(CapabilityError::MissingAuth {
                kind,
                name: self.name.clone(),
            })
        }
    }

    /// Whether `caller` may see and invoke this capability.
    pub fn permits(&self, caller: Option<&Caller>) -> bool {
        match &self.auth {
            Some(requirement) if !requirement.is_empty() => {
                caller.is_some_and(|caller| caller.satisfies(requirement))
            }
            _ => true,
        }
    }
}

// ============================================================================
// Contexts
// ============================================================================

/// Handed to handler factories when a definition is bound to a server.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub info: ServerInfo,
    pub dev_mode: bool,
    pub started_at: Instant,
}

/// Handed to handlers on every invocation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_id: Option<String>,
    pub caller: Option<Caller>,
}

// ============================================================================
// Handler Types
// ============================================================================

pub type ToolResult = Result<ToolsCallResult, McpError>;
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
pub type ToolHandler = Arc<dyn Fn(RequestContext, Value) -> ToolFuture + Send + Sync>;
pub type ToolHandlerFactory = Arc<dyn Fn(&ServerContext) -> ToolHandler + Send + Sync>;

pub type PromptResult = Result<PromptsGetResult, McpError>;
pub type PromptFuture = Pin<Box<dyn Future<Output = PromptResult> + Send>>;
pub type PromptHandler =
    Arc<dyn Fn(RequestContext, HashMap<String, String>) -> PromptFuture + Send + Sync>;
pub type PromptHandlerFactory = Arc<dyn Fn(&ServerContext) -> PromptHandler + Send + Sync>;

pub type ResourceResult = Result<Vec<ResourceContent>, McpError>;
pub type ResourceFuture = Pin<Box<dyn Future<Output = ResourceResult> + Send>>;
pub type ResourceHandler = Arc<dyn Fn(RequestContext, String) -> ResourceFuture + Send + Sync>;
pub type ResourceHandlerFactory = Arc<dyn Fn(&ServerContext) -> ResourceHandler + Send + Sync>;

// ============================================================================
// Definitions
// ============================================================================

pub struct ToolDefinition {
    pub meta: CapabilityMeta,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    factory: ToolHandlerFactory,
}

pub struct PromptDefinition {
    pub meta: CapabilityMeta,
    pub arguments: Vec<PromptArgument>,
    factory: PromptHandlerFactory,
}

pub struct ResourceDefinition {
    pub meta: CapabilityMeta,
    /// Fixed URI or a template with `{param}` segments.
    pub uri: String,
    pub mime_type: Option<String>,
    factory: ResourceHandlerFactory,
}

/// The closed set of capability definitions.
pub enum CapabilityDefinition {
    Tool(ToolDefinition),
    Prompt(PromptDefinition),
    Resource(ResourceDefinition),
}

impl CapabilityDefinition {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            CapabilityDefinition::Tool(_) => CapabilityKind::Tool,
            CapabilityDefinition::Prompt(_) => CapabilityKind::Prompt,
            CapabilityDefinition::Resource(_) => CapabilityKind::Resource,
        }
    }

    pub fn meta(&self) -> &CapabilityMeta {
        match self {
            CapabilityDefinition::Tool(d) => &d.meta,
            CapabilityDefinition::Prompt(d) => &d.meta,
            CapabilityDefinition::Resource(d) => &d.meta,
        }
    }
}

impl From<ToolDefinition> for CapabilityDefinition {
    fn from(definition: ToolDefinition) -> Self {
        CapabilityDefinition::Tool(definition)
    }
}

impl From<PromptDefinition> for CapabilityDefinition {
    fn from(definition: PromptDefinition) -> Self {
        CapabilityDefinition::Prompt(definition)
    }
}

impl From<ResourceDefinition> for CapabilityDefinition {
    fn from(definition: ResourceDefinition) -> Self {
        CapabilityDefinition::Resource(definition)
    }
}

/// Behaviour shared by the three definition kinds, so registries can be
/// written once.
pub trait Capability: Send + Sync + Sized + 'static {
    type Handler: Clone + Send + Sync + 'static;

    const KIND: CapabilityKind;

    fn meta(&self) -> &CapabilityMeta;

    fn make_handler(&self, ctx: &ServerContext) -> Self::Handler;

    /// The binding table for this kind on `server`.
    fn bindings(server: &McpServer) -> &Arc<BindingTable<Self>>;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn validate(&self) -> Result<(), CapabilityError> {
        self.meta().validate(Self::KIND)
    }
}

impl Capability for ToolDefinition {
    type Handler = ToolHandler;
    const KIND: CapabilityKind = CapabilityKind::Tool;

    fn meta(&self) -> &CapabilityMeta {
        &self.meta
    }

    fn make_handler(&self, ctx: &ServerContext) -> ToolHandler {
        (self.factory)(ctx)
    }

    fn bindings(server: &McpServer) -> &Arc<BindingTable<Self>> {
        server.tool_bindings()
    }
}

impl Capability for PromptDefinition {
    type Handler = PromptHandler;
    const KIND: CapabilityKind = CapabilityKind::Prompt;

    fn meta(&self) -> &CapabilityMeta {
        &self.meta
    }

    fn make_handler(&self, ctx: &ServerContext) -> PromptHandler {
        (self.factory)(ctx)
    }

    fn bindings(server: &McpServer) -> &Arc<BindingTable<Self>> {
        server.prompt_bindings()
    }
}

impl Capability for ResourceDefinition {
    type Handler = ResourceHandler;
    const KIND: CapabilityKind = CapabilityKind::Resource;

    fn meta(&self) -> &CapabilityMeta {
        &self.meta
    }

    fn make_handler(&self, ctx: &ServerContext) -> ResourceHandler {
        (self.factory)(ctx)
    }

    fn bindings(server: &McpServer) -> &Arc<BindingTable<Self>> {
        server.resource_bindings()
    }
}

// ============================================================================
// Builder helpers
// ============================================================================

macro_rules! meta_setters {
    () => {
        pub fn title(mut self, title: impl Into<String>) -> Self {
            self.meta.title = Some(title.into());
            self
        }

        pub fn description(mut self, desc: impl Into<String>) -> Self {
            self.meta.description = desc.into();
            self
        }

        pub fn dev_mode_only(mut self) -> Self {
            self.meta.dev_mode_only = true;
            self
        }

        /// Require `action` from the caller.
        pub fn requires(mut self, action: impl Into<String>) -> Self {
            self.meta
                .auth
                .get_or_insert_with(AuthRequirement::default)
                .actions
                .push(action.into());
            self
        }

        /// Restrict the required actions to one subject.
        pub fn auth_subject(mut self, subject: impl Into<String>) -> Self {
            self.meta
                .auth
                .get_or_insert_with(AuthRequirement::default)
                .subject = Some(subject.into());
            self
        }
    };
}

fn named(name: impl Into<String>) -> CapabilityMeta {
    CapabilityMeta {
        name: name.into(),
        ..Default::default()
    }
}

/// Builder for a tool definition
pub struct ToolBuilder {
    meta: CapabilityMeta,
    input_schema: Value,
    output_schema: Option<Value>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: named(name),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            output_schema: None,
        }
    }

    meta_setters!();

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Build with a handler that ignores the server context.
    pub fn build<F, Fut>(self, handler: F) -> ToolDefinition
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |ctx, params| Box::pin(handler(ctx, params)));
        self.build_with(move |_| handler.clone())
    }

    /// Build with a factory producing one handler per bound server.
    pub fn build_with<F>(self, factory: F) -> ToolDefinition
    where
        F: Fn(&ServerContext) -> ToolHandler + Send + Sync + 'static,
    {
        ToolDefinition {
            meta: self.meta,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            factory: Arc::new(factory),
        }
    }
}

/// Builder for a prompt definition
pub struct PromptBuilder {
    meta: CapabilityMeta,
    arguments: Vec<PromptArgument>,
}

impl PromptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: named(name),
            arguments: Vec::new(),
        }
    }

    meta_setters!();

    pub fn argument(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: Some(description.into()),
            required,
        });
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> PromptDefinition
    where
        F: Fn(RequestContext, HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PromptResult> + Send + 'static,
    {
        let handler: PromptHandler = Arc::new(move |ctx, args| Box::pin(handler(ctx, args)));
        self.build_with(move |_| handler.clone())
    }

    pub fn build_with<F>(self, factory: F) -> PromptDefinition
    where
        F: Fn(&ServerContext) -> PromptHandler + Send + Sync + 'static,
    {
        PromptDefinition {
            meta: self.meta,
            arguments: self.arguments,
            factory: Arc::new(factory),
        }
    }
}

/// Builder for a resource definition
pub struct ResourceBuilder {
    meta: CapabilityMeta,
    uri: String,
    mime_type: Option<String>,
}

impl ResourceBuilder {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            meta: named(name),
            uri: uri.into(),
            mime_type: None,
        }
    }

    meta_setters!();

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> ResourceDefinition
    where
        F: Fn(RequestContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResourceResult> + Send + 'static,
    {
        let handler: ResourceHandler = Arc::new(move |ctx, uri| Box::pin(handler(ctx, uri)));
        self.build_with(move |_| handler.clone())
    }

    pub fn build_with<F>(self, factory: F) -> ResourceDefinition
    where
        F: Fn(&ServerContext) -> ResourceHandler + Send + Sync + 'static,
    {
        ResourceDefinition {
            meta: self.meta,
            uri: self.uri,
            mime_type: self.mime_type,
            factory: Arc::new(factory),
        }
    }
}

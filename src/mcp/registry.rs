//! Definition and capability registries
//!
//! A [`DefinitionRegistry`] stores the definitions of one kind and outlives any
//! server. A [`CapabilityRegistry`] is built per protocol server from a
//! snapshot of those definitions and tracks which of them are bound, enabled
//! or disabled on that server.

use std::sync::Arc;

use serde::Serialize;

use super::capability::{
    Capability, CapabilityDefinition, CapabilityKind, PromptDefinition, ResourceDefinition,
    ToolDefinition,
};
use super::error::CapabilityError;
use super::server::RegisteredCapability;
use crate::auth::{AuthRequirement, Caller};

// ============================================================================
// Definition Registry
// ============================================================================

/// Name-keyed store of definitions of one kind, in insertion order.
pub struct DefinitionRegistry<D> {
    definitions: Vec<Arc<D>>,
}

impl<D: Capability> DefinitionRegistry<D> {
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
        }
    }

    /// Add a definition. A duplicate name leaves the existing one in place.
    pub fn define(&mut self, definition: D) -> Result<(), CapabilityError> {
        definition.validate()?;
        if self.get(definition.name()).is_some() {
            return Err(CapabilityError::DuplicateName {
                kind: D::KIND,
                name: definition.name().to_string(),
            });
        }
        self.definitions.push(Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<D>> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    /// Returns whether a definition was removed.
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.definitions.len();
        self.definitions.retain(|d| d.name() != name);
        self.definitions.len() != before
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<D>> + '_ {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl<D: Capability> Default for DefinitionRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three definition registries handed to the server factory.
#[derive(Default)]
pub struct DefinitionSet {
    pub tools: DefinitionRegistry<ToolDefinition>,
    pub prompts: DefinitionRegistry<PromptDefinition>,
    pub resources: DefinitionRegistry<ResourceDefinition>,
}

impl DefinitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a capability of any kind in the matching registry.
    pub fn define(
        &mut self,
        definition: impl Into<CapabilityDefinition>,
    ) -> Result<(), CapabilityError> {
        match definition.into() {
            CapabilityDefinition::Tool(d) => self.tools.define(d),
            CapabilityDefinition::Prompt(d) => self.prompts.define(d),
            CapabilityDefinition::Resource(d) => self.resources.define(d),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len() + self.prompts.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Capability Registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityStatus {
    /// Bound and active.
    Enabled,
    /// Bound but inactive.
    Disabled,
    /// Known to the definitions but not bound on this server.
    Defined,
    /// Unknown.
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityListing {
    pub name: String,
    pub status: CapabilityStatus,
    pub dev_mode_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthRequirement>,
}

/// Bound capabilities of one kind on one protocol server.
pub struct CapabilityRegistry<D: Capability> {
    definitions: Vec<Arc<D>>,
    registered: Vec<RegisteredCapability<D>>,
}

impl<D: Capability> CapabilityRegistry<D> {
    pub fn new(definitions: &DefinitionRegistry<D>) -> Self {
        Self {
            definitions: definitions.values().cloned().collect(),
            registered: Vec::new(),
        }
    }

    /// Bind every definition through `bind` and disable it right away.
    /// Stops at the first name already bound here.
    pub fn register<F>(&mut self, mut bind: F) -> Result<(), CapabilityError>
    where
        F: FnMut(&Arc<D>) -> Result<RegisteredCapability<D>, CapabilityError>,
    {
        for definition in self.definitions.clone() {
            self.bind_one(&definition, &mut bind)?;
        }
        Ok(())
    }

    /// Bind a single definition again, typically after [`remove`](Self::remove).
    pub fn register_one<F>(&mut self, name: &str, mut bind: F) -> Result<(), CapabilityError>
    where
        F: FnMut(&Arc<D>) -> Result<RegisteredCapability<D>, CapabilityError>,
    {
        let definition = self
            .definition(name)
            .cloned()
            .ok_or_else(|| CapabilityError::Undefined {
                kind: D::KIND,
                name: name.to_string(),
            })?;
        self.bind_one(&definition, &mut bind)
    }

    fn bind_one<F>(&mut self, definition: &Arc<D>, bind: &mut F) -> Result<(), CapabilityError>
    where
        F: FnMut(&Arc<D>) -> Result<RegisteredCapability<D>, CapabilityError>,
    {
        if self.get(definition.name()).is_some() {
            return Err(CapabilityError::AlreadyRegistered {
                kind: D::KIND,
                name: definition.name().to_string(),
            });
        }
        let capability = bind(definition)?;
        capability.disable();
        self.registered.push(capability);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredCapability<D>> {
        self.registered.iter().find(|c| c.name() == name)
    }

    fn definition(&self, name: &str) -> Option<&Arc<D>> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    fn get_or_err(&self, name: &str) -> Result<&RegisteredCapability<D>, CapabilityError> {
        self.get(name).ok_or_else(|| CapabilityError::NotRegistered {
            kind: D::KIND,
            name: name.to_string(),
        })
    }

    pub fn status(&self, name: &str) -> CapabilityStatus {
        match self.get(name) {
            Some(capability) if capability.is_enabled() => CapabilityStatus::Enabled,
            Some(_) => CapabilityStatus::Disabled,
            None if self.definition(name).is_some() => CapabilityStatus::Defined,
            None => CapabilityStatus::Undefined,
        }
    }

    pub fn enable(&self, name: &str) -> Result<(), CapabilityError> {
        self.get_or_err(name)?.enable();
        Ok(())
    }

    pub fn disable(&self, name: &str) -> Result<(), CapabilityError> {
        self.get_or_err(name)?.disable();
        Ok(())
    }

    pub fn enable_all(&self) {
        self.registered.iter().for_each(|c| c.enable());
    }

    pub fn disable_all(&self) {
        self.registered.iter().for_each(|c| c.disable());
    }

    /// Detach a binding from the server. The definition stays known.
    pub fn remove(&mut self, name: &str) -> Result<(), CapabilityError> {
        let index = self
            .registered
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| CapabilityError::NotRegistered {
                kind: D::KIND,
                name: name.to_string(),
            })?;
        self.registered.remove(index).remove();
        Ok(())
    }

    pub fn remove_all(&mut self) {
        for capability in self.registered.drain(..) {
            capability.remove();
        }
    }

    /// Enable every disabled dev-mode-only capability that needs no auth.
    /// Returns the names that were enabled.
    pub fn enable_dev_mode_capabilities(&self) -> Vec<String> {
        self.registered
            .iter()
            .filter(|c| {
                let meta = c.definition().meta();
                meta.dev_mode_only && !meta.requires_auth() && !c.is_enabled()
            })
            .map(|c| {
                c.enable();
                c.name().to_string()
            })
            .collect()
    }

    /// Enable every disabled auth-gated capability `caller` satisfies.
    /// Dev-mode-only ones are skipped unless `dev_mode` is set.
    pub fn enable_authorized(&self, caller: &Caller, dev_mode: bool) -> Vec<String> {
        self.registered
            .iter()
            .filter(|c| {
                let meta = c.definition().meta();
                meta.requires_auth()
                    && (dev_mode || !meta.dev_mode_only)
                    && meta.permits(Some(caller))
                    && !c.is_enabled()
            })
            .map(|c| {
                c.enable();
                c.name().to_string()
            })
            .collect()
    }

    /// Every known definition with its status, optionally restricted to `filter`.
    pub fn list(&self, filter: Option<&[CapabilityStatus]>) -> Vec<CapabilityListing> {
        self.definitions
            .iter()
            .map(|d| CapabilityListing {
                name: d.name().to_string(),
                status: self.status(d.name()),
                dev_mode_only: d.meta().dev_mode_only,
                auth: d.meta().auth.clone(),
            })
            .filter(|listing| filter.map_or(true, |statuses| statuses.contains(&listing.status)))
            .collect()
    }

    pub fn kind(&self) -> CapabilityKind {
        D::KIND
    }

    /// Number of bound capabilities.
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

/// The three capability registries bound to one protocol server.
pub struct CapabilityRegistries {
    pub tools: CapabilityRegistry<ToolDefinition>,
    pub prompts: CapabilityRegistry<PromptDefinition>,
    pub resources: CapabilityRegistry<ResourceDefinition>,
}

impl CapabilityRegistries {
    pub fn new(definitions: &DefinitionSet) -> Self {
        Self {
            tools: CapabilityRegistry::new(&definitions.tools),
            prompts: CapabilityRegistry::new(&definitions.prompts),
            resources: CapabilityRegistry::new(&definitions.resources),
        }
    }

    /// Enable, across all kinds, the auth-gated capabilities `caller` may use.
    pub fn enable_authorized(&self, caller: &Caller, dev_mode: bool) -> Vec<String> {
        self.tools
            .enable_authorized(caller, dev_mode)
            .into_iter()
            .chain(self.prompts.enable_authorized(caller, dev_mode))
            .chain(self.resources.enable_authorized(caller, dev_mode))
            .collect()
    }
}

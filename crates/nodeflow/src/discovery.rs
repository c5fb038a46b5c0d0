// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Tool resolution strategies.
//!
//! Two explicit strategies behind one trait: a static constructor table
//! populated at bootstrap, and a lookup against the service registry
//! (handlers registered under a snake_case key). The caller picks the
//! strategy; there is no runtime probing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::ServiceRegistry;
use crate::service::ToolHandler;

/// Configuration for tool resolution.
#[derive(Debug, Clone)]
pub struct ToolDiscoveryConfig {
    /// Reject tool names that are not valid identifiers.
    pub validate_names: bool,
}

impl Default for ToolDiscoveryConfig {
    fn default() -> Self {
        Self {
            validate_names: true,
        }
    }
}

/// Strategy for turning a tool name into a handler.
pub trait ToolResolver: Send + Sync {
    fn resolve(&self, tool_name: &str) -> Result<Arc<dyn ToolHandler>>;
}

/// Registry value type for handlers resolved by lookup.
///
/// The registry stores concrete types; a trait-object handler goes in
/// behind this wrapper and comes back out of `resolve_named`.
#[derive(Clone)]
pub struct ToolHandlerEntry(pub Arc<dyn ToolHandler>);

impl ToolHandlerEntry {
    /// Interface name handler entries are registered under.
    pub const INTERFACE: &'static str = "ToolHandler";
}

impl std::fmt::Debug for ToolHandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandlerEntry").finish_non_exhaustive()
    }
}

/// Resolution from a table populated at bootstrap.
#[derive(Default)]
pub struct StaticTableResolver {
    config: ToolDiscoveryConfig,
    table: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl StaticTableResolver {
    #[must_use]
    pub fn new(config: ToolDiscoveryConfig) -> Self {
        Self {
            config,
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Add a handler under its tool name.
    pub fn register(&self, tool_name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.table.write().insert(tool_name.into(), handler);
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ToolResolver for StaticTableResolver {
    fn resolve(&self, tool_name: &str) -> Result<Arc<dyn ToolHandler>> {
        if self.config.validate_names {
            validate_tool_name(tool_name)?;
        }
        self.table
            .read()
            .get(tool_name)
            .cloned()
            .ok_or_else(|| {
                Error::RegistryResolutionFailed(format!(
                    "tool '{tool_name}' not found in the static table"
                ))
            })
    }
}

impl std::fmt::Debug for StaticTableResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTableResolver")
            .field("tools", &self.table.read().len())
            .finish_non_exhaustive()
    }
}

/// Resolution by service-registry lookup.
///
/// Handlers are registered as [`ToolHandlerEntry`] instances under the
/// snake_case form of the tool type name.
pub struct RegistryLookupResolver {
    registry: Arc<ServiceRegistry>,
    config: ToolDiscoveryConfig,
}

impl RegistryLookupResolver {
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, config: ToolDiscoveryConfig) -> Self {
        Self { registry, config }
    }
}

impl ToolResolver for RegistryLookupResolver {
    fn resolve(&self, tool_name: &str) -> Result<Arc<dyn ToolHandler>> {
        if self.config.validate_names {
            validate_tool_name(tool_name)?;
        }
        let key = to_registry_key(tool_name);
        debug!(tool_name, key, "resolving tool through registry lookup");
        let entry = self
            .registry
            .resolve_named::<ToolHandlerEntry>(ToolHandlerEntry::INTERFACE, &key)?;
        Ok(Arc::clone(&entry.0))
    }
}

impl std::fmt::Debug for RegistryLookupResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryLookupResolver").finish_non_exhaustive()
    }
}

/// Convert a tool type name to its registry key.
///
/// A leading `Tool` prefix is dropped, then the remainder is
/// snake-cased: `ToolContractValidator` becomes `contract_validator`.
/// Names that are already snake_case pass through unchanged.
#[must_use]
pub fn to_registry_key(name: &str) -> String {
    let name = match name.strip_prefix("Tool") {
        Some(rest) if !rest.is_empty() => rest,
        _ => name,
    };
    let mut key = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                key.push('_');
            }
            key.push(ch.to_ascii_lowercase());
        } else {
            key.push(ch);
        }
    }
    key
}

fn validate_tool_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid tool name: '{name}'")))
    }
}

//! Tool adapters and the tool registry
//!
//! A [`ToolFactory`] describes one tool: its name, the capability set it
//! declares, and how to build a fresh [`ToolProbes`] value for a session.
//! Batch operations receive a [`ToolRegistry`] explicitly; there is no global
//! list of known tools.

use crate::capability::{Capability, CapabilitySet, ToolProbes};
use crate::error::{BenchError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub mod external;
pub mod mock;
pub mod process;

pub use external::{CommandSpec, ExternalTool, ToolSpec};
pub use mock::{MockTool, ReforgeMode};
pub use process::{run_command, ProcessOutput};

/// Builds probe sets for one tool
pub trait ToolFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Roles the tool supports, fixed for the lifetime of the factory
    fn capabilities(&self) -> CapabilitySet;

    /// Fresh probes for a new session
    fn probes(&self) -> Result<ToolProbes>;

    /// Default keyword arguments handed to every probe
    fn kwargs(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Ordered set of tools, looked up by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolFactory>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry of external tools from their specifications
    pub fn from_specs(specs: impl IntoIterator<Item = ToolSpec>) -> Result<Self> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(ExternalTool::new(spec)?)?;
        }
        Ok(registry)
    }

    /// Add a tool; names must be unique
    pub fn register(&mut self, tool: impl ToolFactory + 'static) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn ToolFactory>) -> Result<()> {
        if tool.name().trim().is_empty() {
            return Err(BenchError::Config("tool name must not be empty".to_string()));
        }
        if self.get(tool.name()).is_some() {
            return Err(BenchError::Config(format!(
                "tool '{}' is registered twice",
                tool.name()
            )));
        }
        if tool.capabilities().is_empty() {
            return Err(BenchError::Config(format!(
                "tool '{}' declares no capabilities",
                tool.name()
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, tool: impl ToolFactory + 'static) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolFactory>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Look up a tool, failing with a configuration error when it is unknown
    pub fn require(&self, name: &str) -> Result<Arc<dyn ToolFactory>> {
        self.get(name).ok_or_else(|| {
            BenchError::Config(format!(
                "unknown tool '{name}' (known: {})",
                self.names().join(", ")
            ))
        })
    }

    /// Resolve a list of names; an empty list selects every tool
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<dyn ToolFactory>>> {
        if names.is_empty() {
            return Ok(self.tools.clone());
        }
        names.iter().map(|name| self.require(name)).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ToolFactory>> {
        self.tools.iter()
    }

    /// Tools declaring a role, in registration order
    pub fn with_capability(&self, capability: Capability) -> Vec<Arc<dyn ToolFactory>> {
        self.tools
            .iter()
            .filter(|t| t.capabilities().supports(capability))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.tools
                    .iter()
                    .map(|t| (t.name().to_string(), t.capabilities())),
            )
            .finish()
    }
}

/// Require that every tool in a list declares a role
pub fn require_capability(
    tools: &[Arc<dyn ToolFactory>],
    capability: Capability,
) -> Result<()> {
    match tools.iter().find(|t| !t.capabilities().supports(capability)) {
        Some(tool) => Err(BenchError::Config(format!(
            "tool '{}' does not support {capability}",
            tool.name()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with(MockTool::validator("alpha"))
            .unwrap()
            .with(MockTool::reforger("fixer"))
            .unwrap()
    }

    #[test]
    fn test_registry_lookup() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["alpha", "fixer"]);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());

        let error = registry.require("beta").err().unwrap();
        assert!(error.to_string().contains("unknown tool 'beta'"));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = registry();
        assert!(registry.register(MockTool::validator("alpha")).is_err());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_select_and_capability_filter() {
        let registry = registry();
        assert_eq!(registry.select(&[]).unwrap().len(), 2);
        assert!(registry.select(&["nope".to_string()]).is_err());

        let reforgers = registry.with_capability(Capability::Reforge);
        assert_eq!(reforgers.len(), 1);
        assert_eq!(reforgers[0].name(), "fixer");

        assert!(require_capability(&reforgers, Capability::Reforge).is_ok());
        assert!(require_capability(&registry.select(&[]).unwrap(), Capability::Render).is_err());
    }
}

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use storm_agent_model::ModelTool;

use super::{DynTool, Tool, TypedTool};

/// A name to tool mapping owned by one agent.
///
/// Registering a tool whose name is already taken replaces the old tool
/// (last write wins). The replaced tool is returned to the caller and a
/// warning is logged, so the override is never silent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn DynTool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed tool.
    #[inline]
    pub fn register<T: Tool>(&mut self, tool: T) -> Option<Arc<dyn DynTool>> {
        self.register_dyn(Arc::new(TypedTool(tool)))
    }

    /// Registers a tool object, such as one discovered at runtime.
    pub fn register_dyn(
        &mut self,
        tool: Arc<dyn DynTool>,
    ) -> Option<Arc<dyn DynTool>> {
        let name = tool.name().to_owned();
        let replaced = self.tools.insert(name, tool);
        if let Some(replaced) = &replaced {
            warn!("tool `{}` has been replaced", replaced.name());
        }
        replaced
    }

    /// Removes a tool by name.
    #[inline]
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn DynTool>> {
        self.tools.remove(name)
    }

    /// Looks up a tool by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn DynTool>> {
        self.tools.get(name)
    }

    /// Returns `true` if a tool with this name is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the names of all tools, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the definitions of all tools, sorted by name so that
    /// requests built from them are reproducible.
    pub fn definitions(&self) -> Vec<ModelTool> {
        let mut definitions: Vec<_> =
            self.tools.values().map(|tool| tool.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}

impl Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

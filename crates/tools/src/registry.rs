use parley_core::config::CapabilitiesConfig;
use parley_core::types::ToolSchema;
use parley_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::CurrentTimeTool;
use crate::crypto::CryptoPriceTool;
use crate::currency::CurrencyConvertTool;
use crate::notes::{RecallTool, RememberTool};
use crate::Tool;

/// All known tools plus the bundle each capability exposes.
///
/// The default capability's bundle is the base set: it is part of every
/// toolset, so switching capability adds tools instead of swapping them.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    bundles: BTreeMap<String, Vec<String>>,
    base: Option<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            bundles: BTreeMap::new(),
            base: None,
        }
    }

    /// Built-in tools, bundled according to the capability catalog.
    pub fn with_defaults(capabilities: &CapabilitiesConfig) -> Self {
        let mut registry = Self::new();

        // Clock
        registry.register(Arc::new(CurrentTimeTool));

        // Market data
        registry.register(Arc::new(CryptoPriceTool::new()));
        registry.register(Arc::new(CurrencyConvertTool::new()));

        // Notes kept per context
        registry.register(Arc::new(RememberTool));
        registry.register(Arc::new(RecallTool));

        for (name, cap) in &capabilities.catalog {
            registry.bind(name, cap.tools.clone());
        }
        registry.set_base(&capabilities.default);
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = %schema.name, "Registering tool");
        self.tools.insert(schema.name, tool);
    }

    /// Attach a tool bundle to a capability. Unknown tool names are dropped.
    pub fn bind(&mut self, capability: &str, tools: Vec<String>) {
        let known: Vec<String> = tools
            .into_iter()
            .filter(|name| {
                let found = self.tools.contains_key(name);
                if !found {
                    warn!(capability = %capability, tool = %name, "Capability lists an unregistered tool, skipping");
                }
                found
            })
            .collect();
        self.bundles.insert(capability.to_string(), known);
    }

    pub fn set_base(&mut self, capability: &str) {
        self.base = Some(capability.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// The capability whose bundle contains `tool`. Non-base bundles win so
    /// a tool shared with the base set resolves to the specialised capability.
    pub fn capability_for_tool(&self, tool: &str) -> Option<&str> {
        let owns = |(_, tools): &(&String, &Vec<String>)| tools.iter().any(|t| t == tool);
        self.bundles
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != self.base.as_deref())
            .find(owns)
            .or_else(|| self.bundles.iter().find(owns))
            .map(|(name, _)| name.as_str())
    }

    /// Tools exposed while `capability` is active: the base bundle plus its own.
    pub fn toolset(&self, capability: &str) -> Toolset {
        let mut tools = BTreeMap::new();
        let bundles = self
            .base
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(capability));
        for bundle in bundles {
            for name in self.bundles.get(bundle).into_iter().flatten() {
                if let Some(tool) = self.tools.get(name) {
                    tools.insert(name.clone(), tool.clone());
                }
            }
        }
        Toolset {
            capability: capability.to_string(),
            tools,
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults(&CapabilitiesConfig::default())
    }
}

/// Snapshot of the tools available under one capability.
#[derive(Clone)]
pub struct Toolset {
    pub capability: String,
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Toolset {
    /// Schemas in name order, so requests are stable across turns.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn Tool>> {
        self.tools.get(name).ok_or_else(|| {
            Error::ToolNotFound(format!("'{}' is not available under '{}'", name, self.capability))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

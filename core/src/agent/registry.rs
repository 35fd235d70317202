use crate::traits::{Tool, ToolDescriptor, ToolOutput, ToolRegistryAdapter};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// In-process registry. Tools are registered up front and the set is
/// read-only once the registry is shared.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool`, replacing any earlier tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(Arc::new(tool));
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }
}

#[async_trait]
impl ToolRegistryAdapter for ToolRegistry {
    fn list_descriptors(&self, names: &BTreeSet<String>) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .filter(|t| names.contains(t.name()))
            .map(|t| t.descriptor())
            .collect()
    }

    async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<ToolOutput> {
        let Some(tool) = self.find(name) else {
            return Ok(ToolOutput::error(format!("Tool '{}' not found", name)));
        };

        match AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Ok(ToolOutput::error(format!("Execution failed: {}", e))),
            Err(_) => Err(anyhow::anyhow!("tool '{}' panicked during execution", name)),
        }
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of one tool execution as fed back into the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    /// An `Err` here is an ordinary tool failure; registries report it back
    /// to the model rather than aborting the loop.
    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutput>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// The loop's view of a tool registry.
///
/// `execute` distinguishes two failure levels: `Ok(ToolOutput { is_error: true, .. })`
/// is a tool that ran and failed, `Err(_)` means the registry itself can no
/// longer make progress and terminates the loop.
#[async_trait]
pub trait ToolRegistryAdapter: Send + Sync {
    /// Descriptors for the requested names. Unknown names are omitted.
    fn list_descriptors(&self, names: &BTreeSet<String>) -> Vec<ToolDescriptor>;

    async fn execute(&self, name: &str, arguments: serde_json::Value)
    -> anyhow::Result<ToolOutput>;
}

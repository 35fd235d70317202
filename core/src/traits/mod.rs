pub mod provider;
pub mod tool;

pub use provider::{AssistantTurn, CompletionRequest, ConversationTurn, Provider, ToolCallRequest};
pub use tool::{Tool, ToolDescriptor, ToolOutput, ToolRegistryAdapter};

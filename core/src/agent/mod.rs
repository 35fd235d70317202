pub mod conversation;
pub mod loop_;
pub mod registry;
pub mod request;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use conversation::ConversationState;
pub use loop_::AgentLoop;
pub use registry::ToolRegistry;
pub use request::{LoopEvent, LoopObserver, LoopRequest, LoopResult};
pub use task::{TaskHandle, TaskProgress, TaskStatus};

pub mod agent;
pub mod config;
pub mod error;
pub mod providers;
pub mod tools;
pub mod traits;

pub use agent::{
    AgentLoop, ConversationState, LoopEvent, LoopObserver, LoopRequest, LoopResult, TaskHandle,
    TaskProgress, TaskStatus, ToolRegistry,
};
pub use config::*;
pub use error::{RequestError, TaskError, TranscriptError};
pub use providers::*;
pub use tools::*;
pub use traits::*;

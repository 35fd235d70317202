#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptError {
    #[error("tool call id '{0}' was already issued in this conversation")]
    DuplicateToolCallId(String),

    #[error("tool result references unknown tool call id '{0}'")]
    OrphanToolResult(String),

    #[error("tool call '{0}' already has a result")]
    DuplicateToolResult(String),
}

/// Reasons a [`LoopRequest`](crate::agent::LoopRequest) is rejected before any adapter call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("messages must not be empty")]
    EmptyMessages,

    #[error("first message must be a user turn")]
    FirstTurnNotUser,

    #[error("max_iterations must be at least 1")]
    ZeroMaxIterations,

    #[error("max_tokens_per_turn must be positive")]
    ZeroMaxTokens,

    #[error("timeout_ms must be positive")]
    ZeroTimeout,

    #[error("invalid history: {0}")]
    History(#[from] TranscriptError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task result expired after {retention_ms}ms without being observed")]
    Expired { retention_ms: u64 },

    #[error("task aborted before producing a result: {0}")]
    Aborted(String),
}

use crate::agent::ConversationState;
use crate::error::RequestError;
use crate::traits::ConversationTurn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_MAX_ITERATIONS: u32 = 8;
pub const DEFAULT_MAX_TOKENS_PER_TURN: u32 = 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopRequest {
    pub messages: Vec<ConversationTurn>,
    pub max_tokens_per_turn: u32,
    #[serde(default)]
    pub allowed_tool_names: BTreeSet<String>,
    pub max_iterations: u32,
    pub timeout_ms: u64,
}

impl LoopRequest {
    pub fn new(messages: Vec<ConversationTurn>) -> Self {
        Self {
            messages,
            max_tokens_per_turn: DEFAULT_MAX_TOKENS_PER_TURN,
            allowed_tool_names: BTreeSet::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(vec![ConversationTurn::user(content)])
    }

    pub fn with_allowed_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tool_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_tokens_per_turn(mut self, max: u32) -> Self {
        self.max_tokens_per_turn = max;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        self.validated_state().map(|_| ())
    }

    /// Checks the request and builds the initial transcript from `messages`.
    pub(crate) fn validated_state(&self) -> Result<ConversationState, RequestError> {
        match self.messages.first() {
            None => return Err(RequestError::EmptyMessages),
            Some(ConversationTurn::User { .. }) => {}
            Some(_) => return Err(RequestError::FirstTurnNotUser),
        }
        if self.max_iterations == 0 {
            return Err(RequestError::ZeroMaxIterations);
        }
        if self.max_tokens_per_turn == 0 {
            return Err(RequestError::ZeroMaxTokens);
        }
        if self.timeout_ms == 0 {
            return Err(RequestError::ZeroTimeout);
        }

        Ok(ConversationState::from_history(self.messages.clone())?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoopResult {
    Completed {
        final_content: String,
        turns: Vec<ConversationTurn>,
    },
    IterationLimitExceeded {
        turns: Vec<ConversationTurn>,
    },
    TimedOut {
        turns: Vec<ConversationTurn>,
    },
    Cancelled {
        turns: Vec<ConversationTurn>,
    },
    ProviderFailed {
        reason: String,
        turns: Vec<ConversationTurn>,
    },
    ToolFailed {
        tool_call_id: String,
        reason: String,
        turns: Vec<ConversationTurn>,
    },
}

impl LoopResult {
    pub fn turns(&self) -> &[ConversationTurn] {
        match self {
            Self::Completed { turns, .. }
            | Self::IterationLimitExceeded { turns }
            | Self::TimedOut { turns }
            | Self::Cancelled { turns }
            | Self::ProviderFailed { turns, .. }
            | Self::ToolFailed { turns, .. } => turns,
        }
    }

    pub fn into_turns(self) -> Vec<ConversationTurn> {
        match self {
            Self::Completed { turns, .. }
            | Self::IterationLimitExceeded { turns }
            | Self::TimedOut { turns }
            | Self::Cancelled { turns }
            | Self::ProviderFailed { turns, .. }
            | Self::ToolFailed { turns, .. } => turns,
        }
    }

    pub fn final_content(&self) -> Option<&str> {
        match self {
            Self::Completed { final_content, .. } => Some(final_content),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled { .. } => "cancelled",
            Self::ProviderFailed { .. } => "provider_failed",
            Self::ToolFailed { .. } => "tool_failed",
        }
    }
}

/// Progress notifications emitted by a running loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    IterationStarted {
        iteration: u32,
    },
    AssistantReplied {
        iteration: u32,
        tool_calls: usize,
    },
    ToolStarted {
        tool_call_id: String,
        name: String,
    },
    ToolFinished {
        tool_call_id: String,
        name: String,
        is_error: bool,
    },
    ToolRejected {
        tool_call_id: String,
        name: String,
    },
    Finished {
        outcome: &'static str,
        iterations: u32,
    },
}

pub trait LoopObserver: Send + Sync {
    fn on_event(&self, event: &LoopEvent);
}

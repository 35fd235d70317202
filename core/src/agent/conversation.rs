use crate::error::TranscriptError;
use crate::traits::ConversationTurn;
use std::collections::HashSet;

/// Append-only transcript owned by a single loop run.
///
/// Tracks which tool call ids have been issued and which still await a
/// result, so every appended tool result can be correlated with its call.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<ConversationTurn>,
    issued: HashSet<String>,
    pending: HashSet<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(history: Vec<ConversationTurn>) -> Result<Self, TranscriptError> {
        let mut state = Self::new();
        for turn in history {
            state.append(turn)?;
        }
        Ok(state)
    }

    /// Appends `turn`, rejecting it (and leaving the state untouched) if it
    /// would break tool call correlation.
    pub fn append(&mut self, turn: ConversationTurn) -> Result<(), TranscriptError> {
        match &turn {
            ConversationTurn::Assistant(assistant) => {
                let mut seen = HashSet::new();
                for call in &assistant.tool_calls {
                    if self.issued.contains(&call.id) || !seen.insert(call.id.as_str()) {
                        return Err(TranscriptError::DuplicateToolCallId(call.id.clone()));
                    }
                }
                for call in &assistant.tool_calls {
                    self.issued.insert(call.id.clone());
                    self.pending.insert(call.id.clone());
                }
            }
            ConversationTurn::ToolResult { tool_call_id, .. } => {
                if !self.issued.contains(tool_call_id) {
                    return Err(TranscriptError::OrphanToolResult(tool_call_id.clone()));
                }
                if !self.pending.remove(tool_call_id) {
                    return Err(TranscriptError::DuplicateToolResult(tool_call_id.clone()));
                }
            }
            ConversationTurn::User { .. } => {}
        }

        self.turns.push(turn);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn into_turns(self) -> Vec<ConversationTurn> {
        self.turns
    }
}

//! Error types for the conversation layer.

use parley_core::{BackendError, ParleyError};

/// Errors from the chat engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat is disabled")]
    Disabled,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
    #[error("generation failed after {attempts} attempt(s): {source}")]
    GenerationFailed {
        attempts: u32,
        #[source]
        source: BackendError,
    },
    /// Programming error: state the orchestrator relies on is missing or
    /// corrupted. Never a user-facing condition.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<ChatError> for ParleyError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::GenerationFailed { source, .. } => ParleyError::Backend(source),
            other => ParleyError::Storage(other.to_string()),
        }
    }
}

//! Conversation layer for Parley.
//!
//! Provides the per-session conversation context store, the generation
//! backends, and the response orchestrator that turns one user input into
//! a combined reply.

pub mod context;
pub mod continuation;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod topic;

pub use context::{
    ContextEntry, ContextSnapshot, ContextStore, ConversationContext, ConversationState,
    OpenQuestion, Session, SessionSummary, TopicRecord,
};
pub use continuation::LlmEnrichmentBackend;
pub use error::ChatError;
pub use generation::{ExtractiveGenerator, GenerationBackend, GenerationRequest, OpenAiGenerator};
pub use orchestrator::{
    OrchestratorConfig, ResponseOrchestrator, StageReport, StageStatus, TurnResult, TurnStatus,
};
pub use parley_core::TurnEnrichments;
pub use topic::extract_topic;

//! Response orchestrator: runs one conversational turn end to end.
//!
//! Dependency graph per turn:
//!
//! ```text
//!   input analysis (cached) ─────────────────────────────┐
//!   retrieval (search ∥ stored context) ─> generation ──┤
//!                                          └─> output enrichment
//!                                                        └─> fold ─> persist
//! ```
//!
//! Input analysis depends only on the input, so it runs alongside
//! retrieval and generation. Output enrichment waits for the generated
//! text. The context store is touched only after every branch has joined,
//! and the fold itself is a single synchronous step.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::{
    BackendError, EnrichmentBundle, EnrichmentKind, GenerationResult, ParleyConfig,
    RetrievalResult, Turn, TurnEnrichments, TurnRecord,
};
use parley_enrich::{normalize_text, AnalysisService};
use parley_retrieval::RetrievalGateway;

use crate::context::{ContextSnapshot, ContextStore, Session, SessionSummary};
use crate::error::ChatError;
use crate::generation::{GenerationBackend, GenerationRequest};

/// Generation is attempted at most this many times per turn.
const MAX_GENERATION_ATTEMPTS: u32 = 2;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub enabled: bool,
    /// Maximum input length in characters.
    pub max_message_length: usize,
    /// How many earlier exchanges the generator sees.
    pub prior_turn_window: usize,
    pub input_kinds: Vec<EnrichmentKind>,
    pub output_kinds: Vec<EnrichmentKind>,
    pub search_limit: usize,
    pub context_limit: usize,
    pub generation_timeout: Duration,
    /// Pause before retrying a transient generation failure.
    pub retry_delay: Duration,
}

impl OrchestratorConfig {
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            enabled: config.chat.enabled,
            max_message_length: config.chat.max_message_length,
            prior_turn_window: config.chat.prior_turn_window,
            input_kinds: config.enrichment.input_kinds.clone(),
            output_kinds: config.enrichment.output_kinds.clone(),
            search_limit: config.retrieval.search_limit,
            context_limit: config.retrieval.context_limit,
            generation_timeout: Duration::from_millis(config.generation.timeout_ms),
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&ParleyConfig::default())
    }
}

// =============================================================================
// Turn result
// =============================================================================

/// Outcome of one pipeline stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed { reason: String },
    Skipped { reason: String },
}

impl StageStatus {
    pub fn failed(reason: impl Into<String>) -> Self {
        StageStatus::Failed {
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StageStatus::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub retrieval: StageStatus,
    pub generation: StageStatus,
    pub enrichment: StageStatus,
    pub fold: StageStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Every stage succeeded.
    Succeeded,
    /// A reply was produced and folded, but at least one stage failed.
    Degraded,
    /// Generation failed; nothing was folded.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub session_id: Uuid,
    pub turn_id: Uuid,
    pub status: TurnStatus,
    pub generation: Option<GenerationResult>,
    pub enrichments: TurnEnrichments,
    pub retrieval: RetrievalResult,
    pub context: ContextSnapshot,
    pub stages: StageReport,
}

// =============================================================================
// ResponseOrchestrator
// =============================================================================

/// Coordinates retrieval, generation, enrichment, and context updates.
pub struct ResponseOrchestrator {
    config: OrchestratorConfig,
    analysis: Arc<AnalysisService>,
    retrieval: Arc<RetrievalGateway>,
    generator: Arc<dyn GenerationBackend>,
    contexts: Arc<ContextStore>,
}

impl ResponseOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        analysis: Arc<AnalysisService>,
        retrieval: Arc<RetrievalGateway>,
        generator: Arc<dyn GenerationBackend>,
        contexts: Arc<ContextStore>,
    ) -> Self {
        Self {
            config,
            analysis,
            retrieval,
            generator,
            contexts,
        }
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    /// Start (or continue) a session under a caller-chosen id.
    pub fn open_session(&self, id: Uuid) -> Result<Arc<Session>, ChatError> {
        self.contexts.open(id)
    }

    pub fn snapshot(&self, session_id: Uuid) -> Result<ContextSnapshot, ChatError> {
        self.contexts.snapshot(session_id)
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        self.contexts.list()
    }

    pub fn delete_session(&self, session_id: Uuid) -> Result<(), ChatError> {
        self.contexts.remove(session_id)
    }

    /// Run one turn.
    ///
    /// Returns `Err` only for rejected input and invariant violations.
    /// Stage failures, including a failed generation, come back as a
    /// `TurnResult` whose status and stage report say what went wrong.
    pub async fn process_turn(
        &self,
        session_id: Option<Uuid>,
        text: &str,
    ) -> Result<TurnResult, ChatError> {
        self.validate(text)?;

        let session = self.contexts.resolve(session_id)?;
        let _turn_slot = session.lock_turn().await;

        // Stored text must match what the analysis spans index into.
        let turn = Turn::new(normalize_text(text));
        info!(session_id = %session.id(), turn_id = %turn.id, "Processing turn");

        let prior_turns = session.recent_exchanges(self.config.prior_turn_window)?;

        let input_analysis = self.analysis.analyze(&turn.text, &self.config.input_kinds);
        let respond = async {
            let retrieval = self
                .retrieval
                .retrieve(&turn.text, self.config.search_limit, self.config.context_limit)
                .await;
            let request = GenerationRequest {
                prompt: turn.text.clone(),
                prior_turns,
                context: retrieval.clone(),
            };
            let generation = self.generate(&request).await;
            (retrieval, generation)
        };
        let (input_bundle, (retrieval, generation)) = tokio::join!(input_analysis, respond);

        let retrieval_status = if retrieval.is_degraded() {
            StageStatus::failed(retrieval.failures().join("; "))
        } else {
            StageStatus::Succeeded
        };

        let generation = match generation {
            Ok(generation) => generation,
            Err(e) => {
                warn!(session_id = %session.id(), turn_id = %turn.id, error = %e, "Turn failed");
                return Ok(TurnResult {
                    session_id: session.id(),
                    turn_id: turn.id,
                    status: TurnStatus::Failed,
                    generation: None,
                    enrichments: TurnEnrichments::default(),
                    retrieval,
                    context: session.snapshot()?,
                    stages: StageReport {
                        retrieval: retrieval_status,
                        generation: StageStatus::failed(e.to_string()),
                        enrichment: StageStatus::skipped("generation failed"),
                        fold: StageStatus::skipped("generation failed"),
                    },
                });
            }
        };

        let output_bundle = if self.config.output_kinds.is_empty() {
            EnrichmentBundle::new()
        } else {
            self.analysis
                .gateway()
                .analyze(&generation.text, &self.config.output_kinds)
                .await
        };

        let enrichments = TurnEnrichments {
            input: input_bundle.as_ref().clone(),
            output: output_bundle,
        };
        let failed_kinds = enrichments.failures();
        let enrichment_status = if failed_kinds.is_empty() {
            StageStatus::Succeeded
        } else {
            StageStatus::failed(format!("failed kinds: {}", failed_kinds.join(", ")))
        };

        // The held session, even if the registry dropped it mid-turn.
        let context = session.fold(&turn, &generation, &enrichments.input)?;

        self.retrieval.persist(TurnRecord {
            session_id: session.id(),
            turn_id: turn.id,
            user_input: turn.text.clone(),
            ai_response: generation.text.clone(),
            topic: context.history.last().and_then(|e| e.topic.clone()),
            enrichments: enrichments.clone(),
            created_at: turn.received_at,
        });

        let stages = StageReport {
            retrieval: retrieval_status,
            generation: StageStatus::Succeeded,
            enrichment: enrichment_status,
            fold: StageStatus::Succeeded,
        };
        let status = if stages.retrieval.is_succeeded() && stages.enrichment.is_succeeded() {
            TurnStatus::Succeeded
        } else {
            TurnStatus::Degraded
        };

        debug!(
            session_id = %session.id(),
            turn_id = %turn.id,
            status = ?status,
            topic = ?context.current_topic,
            "Turn complete"
        );

        Ok(TurnResult {
            session_id: session.id(),
            turn_id: turn.id,
            status,
            generation: Some(generation),
            enrichments,
            retrieval,
            context,
            stages,
        })
    }

    fn validate(&self, text: &str) -> Result<(), ChatError> {
        if !self.config.enabled {
            return Err(ChatError::Disabled);
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.chars().count() > self.config.max_message_length {
            return Err(ChatError::MessageTooLong(self.config.max_message_length));
        }
        Ok(())
    }

    /// Generate under the configured timeout, retrying once on a transient
    /// failure.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ChatError> {
        let timeout = self.config.generation_timeout;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = tokio::time::timeout(timeout, self.generator.generate(request))
                .await
                .unwrap_or(Err(BackendError::Timeout(timeout)));

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempts < MAX_GENERATION_ATTEMPTS => {
                    warn!(
                        backend = self.generator.name(),
                        attempt = attempts,
                        error = %e,
                        "Generation failed; retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(source) => return Err(ChatError::GenerationFailed { attempts, source }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::generation::ExtractiveGenerator;
    use parley_enrich::{AnalysisCache, EnrichmentGateway};

    fn orchestrator(config: OrchestratorConfig) -> ResponseOrchestrator {
        let gateway = Arc::new(EnrichmentGateway::new(Duration::from_secs(1)));
        ResponseOrchestrator::new(
            OrchestratorConfig {
                input_kinds: vec![],
                output_kinds: vec![],
                ..config
            },
            Arc::new(AnalysisService::new(gateway, AnalysisCache::unbounded())),
            Arc::new(RetrievalGateway::new(Duration::from_secs(1))),
            Arc::new(ExtractiveGenerator::default()),
            Arc::new(ContextStore::new(10, 30)),
        )
    }

    #[tokio::test]
    async fn test_disabled_returns_error() {
        let orch = orchestrator(OrchestratorConfig {
            enabled: false,
            ..Default::default()
        });
        let result = orch.process_turn(None, "hello").await;
        assert!(matches!(result, Err(ChatError::Disabled)));
    }

    #[tokio::test]
    async fn test_empty_message_returns_error() {
        let orch = orchestrator(OrchestratorConfig::default());
        assert!(matches!(
            orch.process_turn(None, "").await,
            Err(ChatError::EmptyMessage)
        ));
        assert!(matches!(
            orch.process_turn(None, "   \n").await,
            Err(ChatError::EmptyMessage)
        ));
        assert!(orch.list_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_length_limit_in_characters() {
        let orch = orchestrator(OrchestratorConfig::default());
        let too_long = "a".repeat(2001);
        assert!(matches!(
            orch.process_turn(None, &too_long).await,
            Err(ChatError::MessageTooLong(2000))
        ));

        let at_max = "é".repeat(2000);
        assert!(orch.process_turn(None, &at_max).await.is_ok());
    }

    #[tokio::test]
    async fn test_turn_creates_and_reuses_session() {
        let orch = orchestrator(OrchestratorConfig::default());
        let first = orch.process_turn(None, "first").await.unwrap();
        let second = orch
            .process_turn(Some(first.session_id), "second")
            .await
            .unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.context.history.len(), 2);
        assert_eq!(second.status, TurnStatus::Succeeded);
    }

    struct Flaky {
        failures_left: std::sync::atomic::AtomicU32,
        error: BackendError,
    }

    #[async_trait]
    impl GenerationBackend for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResult, BackendError> {
            use std::sync::atomic::Ordering;
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(GenerationResult {
                text: "recovered".into(),
                usage: None,
                model: "flaky".into(),
            })
        }
    }

    fn with_generator(generator: Flaky) -> ResponseOrchestrator {
        let mut orch = orchestrator(OrchestratorConfig {
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        });
        orch.generator = Arc::new(generator);
        orch
    }

    #[tokio::test]
    async fn test_transient_generation_failure_retried_once() {
        let orch = with_generator(Flaky {
            failures_left: 1.into(),
            error: BackendError::Transient("503".into()),
        });
        let result = orch.process_turn(None, "hi").await.unwrap();
        assert_eq!(result.status, TurnStatus::Succeeded);
        assert_eq!(result.generation.unwrap().text, "recovered");
    }

    #[tokio::test]
    async fn test_second_transient_failure_fails_turn() {
        let orch = with_generator(Flaky {
            failures_left: 2.into(),
            error: BackendError::Transient("503".into()),
        });
        let result = orch.process_turn(None, "hi").await.unwrap();
        assert_eq!(result.status, TurnStatus::Failed);
        match &result.stages.generation {
            StageStatus::Failed { reason } => assert!(reason.contains("after 2 attempt(s)")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_generation_failure_not_retried() {
        let orch = with_generator(Flaky {
            failures_left: 1.into(),
            error: BackendError::Fatal("invalid api key".into()),
        });
        let result = orch.process_turn(None, "hi").await.unwrap();
        assert_eq!(result.status, TurnStatus::Failed);
        assert!(result.generation.is_none());
        assert!(result.context.history.is_empty());
        assert_eq!(result.stages.fold, StageStatus::skipped("generation failed"));
    }
}

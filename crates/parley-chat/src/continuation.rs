//! Enrichment kinds served by the generation backend.

use std::sync::Arc;

use async_trait::async_trait;

use parley_core::{BackendError, EnrichmentKind, EnrichmentValue};
use parley_enrich::EnrichmentBackend;

use crate::generation::{GenerationBackend, GenerationRequest};

/// Serves `continuation` and `answer` through a [`GenerationBackend`].
pub struct LlmEnrichmentBackend {
    generator: Arc<dyn GenerationBackend>,
}

impl LlmEnrichmentBackend {
    pub fn new(generator: Arc<dyn GenerationBackend>) -> Self {
        Self { generator }
    }

    /// Kinds this backend can serve.
    pub fn kinds() -> [EnrichmentKind; 2] {
        [EnrichmentKind::CONTINUATION, EnrichmentKind::ANSWER]
    }
}

fn prompt_for(kind: &EnrichmentKind, text: &str) -> Option<String> {
    match kind.as_str() {
        "continuation" => Some(format!(
            "Continue the following text in the same voice. Reply with the continuation only.\n\n{}",
            text
        )),
        "answer" => Some(format!("Answer briefly and directly:\n\n{}", text)),
        _ => None,
    }
}

#[async_trait]
impl EnrichmentBackend for LlmEnrichmentBackend {
    fn name(&self) -> &str {
        self.generator.name()
    }

    async fn run(&self, kind: &EnrichmentKind, text: &str) -> Result<EnrichmentValue, BackendError> {
        let prompt = prompt_for(kind, text).ok_or_else(|| {
            BackendError::Unsupported(format!("{} cannot serve '{}'", self.name(), kind))
        })?;
        let result = self
            .generator
            .generate(&GenerationRequest::prompt(prompt))
            .await?;
        Ok(EnrichmentValue::Text(result.text.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use parley_core::GenerationResult;

    #[derive(Default)]
    struct EchoGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationBackend for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationResult, BackendError> {
            assert!(request.prior_turns.is_empty());
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok(GenerationResult {
                text: "  more text \n".into(),
                usage: None,
                model: "echo".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_continuation_prompt_and_trimmed_text() {
        let generator = Arc::new(EchoGenerator::default());
        let backend = LlmEnrichmentBackend::new(Arc::clone(&generator) as Arc<dyn GenerationBackend>);

        let value = backend
            .run(&EnrichmentKind::CONTINUATION, "It was a sunny day")
            .await
            .unwrap();
        assert_eq!(value, EnrichmentValue::Text("more text".into()));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("Continue the following text"));
        assert!(prompts[0].ends_with("It was a sunny day"));
    }

    #[tokio::test]
    async fn test_answer_kind_supported_others_rejected() {
        let backend = LlmEnrichmentBackend::new(Arc::new(EchoGenerator::default()));
        assert!(backend.run(&EnrichmentKind::ANSWER, "2+2?").await.is_ok());

        let err = backend
            .run(&EnrichmentKind::SENTIMENT, "text")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }
}

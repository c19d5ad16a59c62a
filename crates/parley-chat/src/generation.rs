//! Primary response generation.
//!
//! Two backends ship with the crate: an OpenAI-compatible chat-completions
//! client and an extractive generator that composes a reply from the
//! retrieval context without requiring an LLM.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_core::config::GenerationConfig;
use parley_core::{BackendError, GenerationResult, PriorExchange, RetrievalResult, TokenUsage};

/// Everything the generator sees for one turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Earlier exchanges, oldest first.
    pub prior_turns: Vec<PriorExchange>,
    pub context: RetrievalResult,
}

impl GenerationRequest {
    /// A bare prompt with no history and no retrieval context.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            prompt: text.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, BackendError>;
}

// =============================================================================
// OpenAI-compatible chat completions
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenAI and API-compatible servers.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    presence_penalty: f32,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            presence_penalty: config.presence_penalty,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Serialize the retrieval context for the system message, or `None` when
/// there is nothing to show.
fn context_message(context: &RetrievalResult) -> Result<Option<String>, BackendError> {
    if context.is_empty() {
        return Ok(None);
    }
    let json = serde_json::to_string(context)
        .map_err(|e| BackendError::Fatal(format!("unserializable context: {}", e)))?;
    Ok(Some(format!("Context: {}", json)))
}

fn build_messages<'a>(
    system_prompt: &'a str,
    context: Option<&'a str>,
    request: &'a GenerationRequest,
) -> Vec<ChatMessage<'a>> {
    let mut messages = vec![ChatMessage {
        role: "system",
        content: system_prompt,
    }];
    if let Some(context) = context {
        messages.push(ChatMessage {
            role: "system",
            content: context,
        });
    }
    for exchange in &request.prior_turns {
        messages.push(ChatMessage {
            role: "user",
            content: &exchange.user,
        });
        messages.push(ChatMessage {
            role: "assistant",
            content: &exchange.assistant,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.prompt,
    });
    messages
}

#[async_trait]
impl GenerationBackend for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, BackendError> {
        let context = context_message(&request.context)?;
        let body = CompletionRequest {
            model: &self.model,
            messages: build_messages(&self.system_prompt, context.as_deref(), request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("generation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &text));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("malformed completion: {}", e)))?;

        let result = into_generation(completion, &self.model)?;
        debug!(
            model = %result.model,
            total_tokens = result.usage.map(|u| u.total_tokens).unwrap_or(0),
            "Completion received"
        );
        Ok(result)
    }
}

fn into_generation(
    completion: CompletionResponse,
    requested_model: &str,
) -> Result<GenerationResult, BackendError> {
    let text = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::Fatal("completion contained no message".into()))?;
    Ok(GenerationResult {
        text,
        usage: completion.usage,
        model: completion
            .model
            .unwrap_or_else(|| requested_model.to_string()),
    })
}

// =============================================================================
// Extractive
// =============================================================================

/// Composes a reply from search hits and stored context, without an LLM.
pub struct ExtractiveGenerator {
    max_hits: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_hits: usize) -> Self {
        Self {
            max_hits: max_hits.max(1),
        }
    }

    fn compose(&self, request: &GenerationRequest) -> String {
        let context = &request.context;
        let mut lines = Vec::new();

        if !context.search_hits.is_empty() {
            lines.push(format!("Here is what I found for \"{}\":", request.prompt));
            for hit in context.search_hits.iter().take(self.max_hits) {
                if hit.snippet.is_empty() {
                    lines.push(format!("- {} ({})", hit.title, hit.link));
                } else {
                    lines.push(format!("- {}: {} ({})", hit.title, hit.snippet, hit.link));
                }
            }
        }

        let earlier: Vec<&str> = context
            .stored_context
            .iter()
            .filter_map(|hit| hit.record.get("user_input").and_then(|v| v.as_str()))
            .take(self.max_hits)
            .collect();
        if !earlier.is_empty() {
            lines.push("Related things you asked before:".to_string());
            lines.extend(earlier.iter().map(|q| format!("- {}", q)));
        }

        if lines.is_empty() {
            match request.prior_turns.last() {
                Some(prev) => format!(
                    "I don't have anything new on \"{}\". Earlier you asked: \"{}\".",
                    request.prompt, prev.user
                ),
                None => format!(
                    "I don't have enough information to answer \"{}\" yet.",
                    request.prompt
                ),
            }
        } else {
            lines.join("\n")
        }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl GenerationBackend for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, BackendError> {
        Ok(GenerationResult {
            text: self.compose(request),
            usage: None,
            model: "extractive".to_string(),
        })
    }
}

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackendError;

// =============================================================================
// Turn
// =============================================================================

/// One user input as it arrived. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl Turn {
    /// Stamp a new turn with a fresh id and the current time.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

// =============================================================================
// Retrieval
// =============================================================================

/// A single web search hit, in backend ranking order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
    /// Tag naming the backend that produced the hit (e.g. "google").
    pub source: String,
}

/// A record returned by the stored-context backend with its relevance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredContextHit {
    /// Freeform record as stored by the backend.
    pub record: serde_json::Value,
    /// Relevance score assigned by the backend (higher is more relevant).
    pub relevance: f32,
}

/// Combined retrieval output for one turn.
///
/// A failed source contributes an empty sequence and a failure reason; the
/// other source is unaffected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub search_hits: Vec<SearchHit>,
    pub stored_context: Vec<StoredContextHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_failure: Option<String>,
}

impl RetrievalResult {
    /// True when neither source produced anything.
    pub fn is_empty(&self) -> bool {
        self.search_hits.is_empty() && self.stored_context.is_empty()
    }

    /// True when at least one source failed.
    pub fn is_degraded(&self) -> bool {
        self.search_failure.is_some() || self.context_failure.is_some()
    }

    /// Human-readable failure reasons, one per failed source.
    pub fn failures(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if let Some(ref e) = self.search_failure {
            reasons.push(format!("search: {}", e));
        }
        if let Some(ref e) = self.context_failure {
            reasons.push(format!("stored context: {}", e));
        }
        reasons
    }
}

/// Record handed to the stored-context backend after a turn has been folded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: Uuid,
    pub turn_id: Uuid,
    pub user_input: String,
    pub ai_response: String,
    pub topic: Option<String>,
    pub enrichments: TurnEnrichments,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Generation
// =============================================================================

/// Token accounting reported by the generation backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Primary response produced by the generation backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    pub model: String,
}

/// One earlier user/assistant exchange shown to the generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorExchange {
    pub user: String,
    pub assistant: String,
}

// =============================================================================
// Enrichment
// =============================================================================

/// Identifier of an enrichment capability.
///
/// Kinds are an open set of string tags; the associated constants name the
/// ones the workspace ships backends for.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrichmentKind(Cow<'static, str>);

impl EnrichmentKind {
    pub const SENTIMENT: EnrichmentKind = EnrichmentKind(Cow::Borrowed("sentiment"));
    pub const ENTITIES: EnrichmentKind = EnrichmentKind(Cow::Borrowed("entities"));
    pub const KEY_PHRASES: EnrichmentKind = EnrichmentKind(Cow::Borrowed("key_phrases"));
    pub const SUMMARY: EnrichmentKind = EnrichmentKind(Cow::Borrowed("summary"));
    pub const CONTINUATION: EnrichmentKind = EnrichmentKind(Cow::Borrowed("continuation"));
    pub const ANSWER: EnrichmentKind = EnrichmentKind(Cow::Borrowed("answer"));

    pub fn new(tag: impl Into<String>) -> Self {
        EnrichmentKind(Cow::Owned(tag.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnrichmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EnrichmentKind {
    fn from(tag: &str) -> Self {
        EnrichmentKind::new(tag)
    }
}

/// A named entity located in analyzed text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

/// A key phrase with its importance score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPhrase {
    pub text: String,
    pub importance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// Sentiment classification of a text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    /// Classifier confidence in `label` (0.0 to 1.0).
    pub score: f32,
    /// Signed polarity (-1.0 to 1.0).
    pub polarity: f32,
}

/// Payload produced by an enrichment backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EnrichmentValue {
    Sentiment(Sentiment),
    Entities(Vec<Entity>),
    KeyPhrases(Vec<KeyPhrase>),
    Text(String),
    Json(serde_json::Value),
}

/// Result slot for one enrichment kind: either a value or a failure marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    Ready { value: EnrichmentValue },
    Failed { reason: String, transient: bool },
}

impl EnrichmentOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, EnrichmentOutcome::Ready { .. })
    }
}

/// Mapping from enrichment kind to its outcome. Any kind may carry a failure
/// marker while the others hold values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrichmentBundle(BTreeMap<EnrichmentKind, EnrichmentOutcome>);

impl EnrichmentBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of one backend call under `kind`.
    pub fn record(&mut self, kind: EnrichmentKind, result: Result<EnrichmentValue, BackendError>) {
        let outcome = match result {
            Ok(value) => EnrichmentOutcome::Ready { value },
            Err(e) => EnrichmentOutcome::Failed {
                reason: e.to_string(),
                transient: e.is_transient(),
            },
        };
        self.0.insert(kind, outcome);
    }

    /// Record a failure that did not come from a backend call.
    pub fn record_failure(&mut self, kind: EnrichmentKind, reason: impl Into<String>) {
        self.0.insert(
            kind,
            EnrichmentOutcome::Failed {
                reason: reason.into(),
                transient: false,
            },
        );
    }

    pub fn get(&self, kind: &EnrichmentKind) -> Option<&EnrichmentOutcome> {
        self.0.get(kind)
    }

    /// The value recorded for `kind`, if it succeeded.
    pub fn value(&self, kind: &EnrichmentKind) -> Option<&EnrichmentValue> {
        match self.0.get(kind) {
            Some(EnrichmentOutcome::Ready { value }) => Some(value),
            _ => None,
        }
    }

    pub fn entities(&self) -> Option<&[Entity]> {
        match self.value(&EnrichmentKind::ENTITIES) {
            Some(EnrichmentValue::Entities(list)) => Some(list),
            _ => None,
        }
    }

    pub fn key_phrases(&self) -> Option<&[KeyPhrase]> {
        match self.value(&EnrichmentKind::KEY_PHRASES) {
            Some(EnrichmentValue::KeyPhrases(list)) => Some(list),
            _ => None,
        }
    }

    pub fn sentiment(&self) -> Option<&Sentiment> {
        match self.value(&EnrichmentKind::SENTIMENT) {
            Some(EnrichmentValue::Sentiment(s)) => Some(s),
            _ => None,
        }
    }

    /// Text payload for kinds such as continuation, summary or answer.
    pub fn text(&self, kind: &EnrichmentKind) -> Option<&str> {
        match self.value(kind) {
            Some(EnrichmentValue::Text(t)) => Some(t),
            _ => None,
        }
    }

    /// Kinds whose slot holds a failure marker, in key order.
    pub fn failed_kinds(&self) -> Vec<&EnrichmentKind> {
        self.0
            .iter()
            .filter(|(_, outcome)| !outcome.is_ready())
            .map(|(kind, _)| kind)
            .collect()
    }

    /// True when every recorded kind succeeded.
    pub fn is_complete(&self) -> bool {
        self.0.values().all(EnrichmentOutcome::is_ready)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EnrichmentKind, &EnrichmentOutcome)> {
        self.0.iter()
    }
}

/// Enrichments of the user input and of the generated reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnEnrichments {
    pub input: EnrichmentBundle,
    pub output: EnrichmentBundle,
}

impl TurnEnrichments {
    /// Failed kinds, prefixed with the side they belong to.
    pub fn failures(&self) -> Vec<String> {
        let input = self.input.failed_kinds().into_iter().map(|k| format!("input {}", k));
        let output = self.output.failed_kinds().into_iter().map(|k| format!("output {}", k));
        input.chain(output).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_turn_new_assigns_unique_ids() {
        let a = Turn::new("hello");
        let b = Turn::new("hello");
        assert_ne!(a.id, b.id);
        assert_eq!(a.text, "hello");
    }

    #[test]
    fn test_enrichment_kind_constants_and_owned_compare_equal() {
        assert_eq!(EnrichmentKind::SENTIMENT, EnrichmentKind::new("sentiment"));
        assert_eq!(EnrichmentKind::from("entities"), EnrichmentKind::ENTITIES);
        assert_eq!(EnrichmentKind::CONTINUATION.to_string(), "continuation");
    }

    #[test]
    fn test_enrichment_kind_serializes_as_plain_string() {
        let json = serde_json::to_string(&EnrichmentKind::KEY_PHRASES).unwrap();
        assert_eq!(json, "\"key_phrases\"");
        let back: EnrichmentKind = serde_json::from_str("\"summary\"").unwrap();
        assert_eq!(back, EnrichmentKind::SUMMARY);
    }

    #[test]
    fn test_bundle_records_success_and_failure_per_kind() {
        let mut bundle = EnrichmentBundle::new();
        bundle.record(
            EnrichmentKind::ENTITIES,
            Ok(EnrichmentValue::Entities(vec![Entity {
                text: "Paris".into(),
                label: "LOC".into(),
                start: 0,
                end: 5,
            }])),
        );
        bundle.record(
            EnrichmentKind::SENTIMENT,
            Err(BackendError::Timeout(Duration::from_secs(2))),
        );

        assert_eq!(bundle.len(), 2);
        assert!(!bundle.is_complete());
        assert_eq!(bundle.entities().unwrap()[0].text, "Paris");
        assert!(bundle.sentiment().is_none());
        assert_eq!(bundle.failed_kinds(), vec![&EnrichmentKind::SENTIMENT]);
        match bundle.get(&EnrichmentKind::SENTIMENT) {
            Some(EnrichmentOutcome::Failed { transient, .. }) => assert!(*transient),
            other => panic!("expected failure marker, got {:?}", other),
        }
    }

    #[test]
    fn test_bundle_accessor_does_not_cross_kinds() {
        let mut bundle = EnrichmentBundle::new();
        bundle.record(
            EnrichmentKind::ENTITIES,
            Ok(EnrichmentValue::Text("not entities".into())),
        );
        assert!(bundle.entities().is_none());
        assert!(bundle.text(&EnrichmentKind::SUMMARY).is_none());
        assert_eq!(bundle.text(&EnrichmentKind::ENTITIES), Some("not entities"));
    }

    #[test]
    fn test_bundle_json_shape() {
        let mut bundle = EnrichmentBundle::new();
        bundle.record(
            EnrichmentKind::CONTINUATION,
            Ok(EnrichmentValue::Text("and so on".into())),
        );
        bundle.record_failure(EnrichmentKind::ANSWER, "no backend registered");
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["continuation"]["status"], "ready");
        assert_eq!(json["continuation"]["value"]["type"], "text");
        assert_eq!(json["continuation"]["value"]["value"], "and so on");
        assert_eq!(json["answer"]["status"], "failed");
        assert_eq!(json["answer"]["transient"], false);
    }

    #[test]
    fn test_empty_bundle_is_complete() {
        let bundle = EnrichmentBundle::new();
        assert!(bundle.is_empty());
        assert!(bundle.is_complete());
    }

    #[test]
    fn test_turn_enrichments_failures_name_their_side() {
        let mut enrichments = TurnEnrichments::default();
        enrichments
            .input
            .record(EnrichmentKind::SENTIMENT, Err(BackendError::Fatal("down".into())));
        enrichments
            .output
            .record_failure(EnrichmentKind::CONTINUATION, "no backend registered");
        assert_eq!(
            enrichments.failures(),
            vec!["input sentiment".to_string(), "output continuation".to_string()]
        );
    }

    #[test]
    fn test_turn_enrichments_accept_empty_json() {
        let enrichments: TurnEnrichments = serde_json::from_str("{}").unwrap();
        assert!(enrichments.input.is_empty());
        assert!(enrichments.output.is_empty());
    }

    #[test]
    fn test_retrieval_result_failures() {
        let mut result = RetrievalResult::default();
        assert!(result.is_empty());
        assert!(!result.is_degraded());

        result.search_failure = Some("503".into());
        assert!(result.is_degraded());
        assert_eq!(result.failures(), vec!["search: 503".to_string()]);
    }

    #[test]
    fn test_retrieval_result_omits_absent_failures_in_json() {
        let json = serde_json::to_value(RetrievalResult::default()).unwrap();
        assert!(json.get("search_failure").is_none());
        assert!(json.get("context_failure").is_none());
    }
}

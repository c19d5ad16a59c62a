//! Enrichment gateway: one backend call per requested kind.
//!
//! Backends are black boxes registered per kind. The gateway bounds every
//! call with its timeout, checks that the payload matches the kind that was
//! asked for, and records a failure marker for any kind that does not
//! produce a usable value.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use parley_core::{BackendError, EnrichmentBundle, EnrichmentKind, EnrichmentValue};

use crate::error::EnrichError;

/// A pluggable text-analysis capability.
///
/// One backend may serve several kinds; the gateway passes the requested
/// kind on every call.
#[async_trait]
pub trait EnrichmentBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run the analysis identified by `kind` over `text`.
    async fn run(&self, kind: &EnrichmentKind, text: &str)
        -> Result<EnrichmentValue, BackendError>;
}

/// Dispatches enrichment requests to the backend registered for each kind.
pub struct EnrichmentGateway {
    backends: HashMap<EnrichmentKind, Arc<dyn EnrichmentBackend>>,
    timeout: Duration,
}

impl EnrichmentGateway {
    /// Create an empty gateway whose backend calls are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            backends: HashMap::new(),
            timeout,
        }
    }

    /// Register `backend` for `kind`, replacing any previous registration.
    pub fn register(&mut self, kind: EnrichmentKind, backend: Arc<dyn EnrichmentBackend>) {
        debug!(kind = %kind, backend = backend.name(), "Enrichment backend registered");
        self.backends.insert(kind, backend);
    }

    /// Whether a backend is registered for `kind`.
    pub fn supports(&self, kind: &EnrichmentKind) -> bool {
        self.backends.contains_key(kind)
    }

    /// Analyze `text` for every requested kind.
    ///
    /// Kinds run concurrently. Duplicate kinds are analyzed once. The
    /// returned bundle has exactly one slot per distinct requested kind.
    pub async fn analyze(&self, text: &str, kinds: &[EnrichmentKind]) -> EnrichmentBundle {
        let mut seen = HashSet::new();
        let distinct: Vec<&EnrichmentKind> =
            kinds.iter().filter(|k| seen.insert(*k)).collect();

        let calls = distinct.into_iter().map(|kind| async move {
            let result = self.run_one(kind, text).await;
            (kind.clone(), result)
        });

        let mut bundle = EnrichmentBundle::new();
        for (kind, result) in join_all(calls).await {
            match result {
                Ok(value) => bundle.record(kind, Ok(value)),
                Err(EnrichError::Backend(e)) => {
                    warn!(kind = %kind, error = %e, "Enrichment backend failed");
                    bundle.record(kind, Err(e));
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Enrichment unavailable");
                    bundle.record_failure(kind, e.to_string());
                }
            }
        }
        bundle
    }

    /// Generate a continuation of `seed` with the continuation backend.
    pub async fn generate_continuation(&self, seed: &str) -> Result<String, EnrichError> {
        match self.run_one(&EnrichmentKind::CONTINUATION, seed).await? {
            EnrichmentValue::Text(text) => Ok(text),
            _ => Err(EnrichError::UnexpectedPayload {
                kind: EnrichmentKind::CONTINUATION,
            }),
        }
    }

    async fn run_one(
        &self,
        kind: &EnrichmentKind,
        text: &str,
    ) -> Result<EnrichmentValue, EnrichError> {
        let backend = self
            .backends
            .get(kind)
            .ok_or_else(|| EnrichError::MissingBackend(kind.clone()))?;

        let value = tokio::time::timeout(self.timeout, backend.run(kind, text))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;

        if !payload_matches(kind, &value) {
            return Err(EnrichError::UnexpectedPayload { kind: kind.clone() });
        }
        Ok(value)
    }
}

/// Well-known kinds must come back with their own payload shape. Open-set
/// kinds accept any payload.
fn payload_matches(kind: &EnrichmentKind, value: &EnrichmentValue) -> bool {
    match kind.as_str() {
        "sentiment" => matches!(value, EnrichmentValue::Sentiment(_)),
        "entities" => matches!(value, EnrichmentValue::Entities(_)),
        "key_phrases" => matches!(value, EnrichmentValue::KeyPhrases(_)),
        "summary" | "continuation" | "answer" => matches!(value, EnrichmentValue::Text(_)),
        _ => true,
    }
}

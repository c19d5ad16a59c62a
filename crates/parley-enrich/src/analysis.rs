//! Cached analysis of conversational input.

use std::sync::Arc;

use tracing::{debug, warn};

use parley_core::{EnrichmentBundle, EnrichmentKind};

use crate::cache::{AnalysisCache, AnalysisKey};
use crate::error::EnrichError;
use crate::gateway::EnrichmentGateway;

/// Runs gateway analyses through the analysis cache.
///
/// Only complete bundles are cached. A bundle with failed kinds is returned
/// to the caller as-is and recomputed on the next identical request.
pub struct AnalysisService {
    gateway: Arc<EnrichmentGateway>,
    cache: AnalysisCache,
}

impl AnalysisService {
    pub fn new(gateway: Arc<EnrichmentGateway>, cache: AnalysisCache) -> Self {
        Self { gateway, cache }
    }

    pub fn gateway(&self) -> &Arc<EnrichmentGateway> {
        &self.gateway
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Analyze `text` for `kinds`, reusing a cached bundle when one exists.
    pub async fn analyze(&self, text: &str, kinds: &[EnrichmentKind]) -> Arc<EnrichmentBundle> {
        let key = AnalysisKey::new(text, kinds);
        let gateway = Arc::clone(&self.gateway);

        let result = self
            .cache
            .get_or_compute(key, |key| async move {
                let bundle = gateway.analyze(key.text(), key.kinds()).await;
                if bundle.is_complete() {
                    Ok(bundle)
                } else {
                    Err(EnrichError::Incomplete(Arc::new(bundle)))
                }
            })
            .await;

        match result {
            Ok(bundle) => bundle,
            Err(err) => match err.as_ref() {
                EnrichError::Incomplete(partial) => {
                    debug!(
                        failed = partial.failed_kinds().len(),
                        "Analysis incomplete; not cached"
                    );
                    Arc::clone(partial)
                }
                other => {
                    warn!(error = %other, "Analysis failed");
                    let mut bundle = EnrichmentBundle::new();
                    for kind in kinds {
                        bundle.record_failure(kind.clone(), other.to_string());
                    }
                    Arc::new(bundle)
                }
            },
        }
    }
}

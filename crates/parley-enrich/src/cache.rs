//! Analysis cache keyed by (normalized text, requested kinds).
//!
//! Population is single-flight: concurrent requests for the same key share
//! one computation and observe the same value. Failed computations are not
//! stored, so the next identical request computes again. There is no
//! invalidation path; entries live until the process exits unless a
//! capacity is configured.

use std::future::Future;
use std::sync::Arc;

use moka::future::Cache;
use tracing::debug;

use parley_core::{EnrichmentBundle, EnrichmentKind};

/// Canonical cache key.
///
/// Text is trimmed and internal whitespace runs collapse to one space.
/// Kinds are sorted and deduplicated, so request order does not matter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AnalysisKey {
    text: String,
    kinds: Vec<EnrichmentKind>,
}

impl AnalysisKey {
    pub fn new(text: &str, kinds: &[EnrichmentKind]) -> Self {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        Self {
            text: normalize_text(text),
            kinds,
        }
    }

    /// The normalized text. This is the text that gets analyzed.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kinds(&self) -> &[EnrichmentKind] {
        &self.kinds
    }
}

/// Trim and collapse whitespace runs to a single space. Analysis spans are
/// offsets into this form of the text.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Memoizes analysis bundles for the lifetime of the process.
pub struct AnalysisCache {
    entries: Cache<AnalysisKey, Arc<EnrichmentBundle>>,
}

impl AnalysisCache {
    /// Create a cache. `capacity` of `None` never evicts.
    pub fn new(capacity: Option<u64>) -> Self {
        let mut builder = Cache::builder();
        if let Some(max) = capacity {
            builder = builder.max_capacity(max);
        }
        Self {
            entries: builder.build(),
        }
    }

    /// Unbounded cache.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Return the cached bundle for `key`, or run `compute` to produce it.
    ///
    /// `compute` is called at most once per key while its result is cached.
    /// Concurrent callers with the same key wait for the in-flight
    /// computation instead of starting their own. An `Err` is handed to
    /// every waiting caller and is not cached.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: AnalysisKey,
        compute: F,
    ) -> Result<Arc<EnrichmentBundle>, Arc<E>>
    where
        F: FnOnce(AnalysisKey) -> Fut,
        Fut: Future<Output = Result<EnrichmentBundle, E>>,
        E: Send + Sync + 'static,
    {
        let init_key = key.clone();
        self.entries
            .try_get_with(key, async move {
                debug!(kinds = ?init_key.kinds(), "Analysis cache miss");
                compute(init_key).await.map(Arc::new)
            })
            .await
    }

    /// Whether a value is cached for `key`.
    pub fn contains(&self, key: &AnalysisKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of cached analyses after pending maintenance has run.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use parley_core::EnrichmentValue;

    fn bundle_with_summary(text: &str) -> EnrichmentBundle {
        let mut bundle = EnrichmentBundle::new();
        bundle.record(
            EnrichmentKind::SUMMARY,
            Ok(EnrichmentValue::Text(text.to_string())),
        );
        bundle
    }

    #[test]
    fn test_key_normalizes_text_and_kind_order() {
        let a = AnalysisKey::new(
            "  What is   the weather? ",
            &[EnrichmentKind::SENTIMENT, EnrichmentKind::ENTITIES],
        );
        let b = AnalysisKey::new(
            "What is the weather?",
            &[
                EnrichmentKind::ENTITIES,
                EnrichmentKind::SENTIMENT,
                EnrichmentKind::ENTITIES,
            ],
        );
        assert_eq!(a, b);
        assert_eq!(a.text(), "What is the weather?");
        assert_eq!(a.kinds().len(), 2);
    }

    #[test]
    fn test_key_distinguishes_kind_sets_and_case() {
        let base = AnalysisKey::new("Paris", &[EnrichmentKind::ENTITIES]);
        assert_ne!(
            base,
            AnalysisKey::new("Paris", &[EnrichmentKind::ENTITIES, EnrichmentKind::SENTIMENT])
        );
        assert_ne!(base, AnalysisKey::new("paris", &[EnrichmentKind::ENTITIES]));
    }

    #[tokio::test]
    async fn test_second_call_returns_memoized_value() {
        let cache = AnalysisCache::unbounded();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = AnalysisKey::new("hello", &[EnrichmentKind::SUMMARY]);

        let mut results = Vec::new();
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let result = cache
                .get_or_compute(key.clone(), |k| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(bundle_with_summary(k.text()))
                })
                .await
                .unwrap();
            results.push(result);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results[0], results[1]);
        assert!(Arc::ptr_eq(&results[0], &results[1]));
        assert!(cache.contains(&key));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = AnalysisCache::unbounded();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = AnalysisKey::new("flaky", &[EnrichmentKind::SUMMARY]);

        let c = Arc::clone(&calls);
        let first = cache
            .get_or_compute(key.clone(), |_| async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<EnrichmentBundle, _>("backend down".to_string())
            })
            .await;
        assert_eq!(first.unwrap_err().as_str(), "backend down");
        assert!(!cache.contains(&key));

        let c = Arc::clone(&calls);
        let second = cache
            .get_or_compute(key.clone(), |k| async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(bundle_with_summary(k.text()))
            })
            .await
            .unwrap();
        assert_eq!(second.text(&EnrichmentKind::SUMMARY), Some("flaky"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_computation() {
        let cache = Arc::new(AnalysisCache::unbounded());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let key = AnalysisKey::new("same text", &[EnrichmentKind::SUMMARY]);
                cache
                    .get_or_compute(key, |k| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(bundle_with_summary(k.text()))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], result));
        }
    }

    #[tokio::test]
    async fn test_distinct_keys_compute_separately() {
        let cache = AnalysisCache::unbounded();
        for text in ["one", "two", "three"] {
            let key = AnalysisKey::new(text, &[EnrichmentKind::SUMMARY]);
            cache
                .get_or_compute(key, |k| async move {
                    Ok::<_, String>(bundle_with_summary(k.text()))
                })
                .await
                .unwrap();
        }
        assert_eq!(cache.entry_count().await, 3);
    }

    #[tokio::test]
    async fn test_bounded_cache_evicts() {
        let cache = AnalysisCache::new(Some(2));
        for i in 0..20 {
            let key = AnalysisKey::new(&format!("text {}", i), &[EnrichmentKind::SUMMARY]);
            cache
                .get_or_compute(key, |k| async move {
                    Ok::<_, String>(bundle_with_summary(k.text()))
                })
                .await
                .unwrap();
        }
        assert!(cache.entry_count().await <= 2);
    }
}

//! Retrieval gateway over a web search backend and a stored-context backend.
//!
//! The two sources are independent. A failing source degrades to an empty
//! sequence plus a failure reason on the combined result; the turn goes on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parley_core::{BackendError, RetrievalResult, SearchHit, StoredContextHit, TurnRecord};

use crate::error::RetrievalError;

/// Web search capability. Hits come back in backend ranking order.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, BackendError>;
}

/// Persisted conversation history capability.
#[async_trait]
pub trait StoredContextBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Records relevant to `query`, most relevant first.
    async fn lookup(&self, query: &str, limit: usize)
        -> Result<Vec<StoredContextHit>, BackendError>;

    /// Store a completed turn.
    async fn persist(&self, record: &TurnRecord) -> Result<(), BackendError>;
}

/// Fronts the configured retrieval sources.
///
/// A source left unconfigured yields an empty sequence without a failure
/// flag.
pub struct RetrievalGateway {
    search: Option<Arc<dyn SearchBackend>>,
    stored_context: Option<Arc<dyn StoredContextBackend>>,
    timeout: Duration,
}

impl RetrievalGateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            search: None,
            stored_context: None,
            timeout,
        }
    }

    pub fn with_search(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        debug!(backend = backend.name(), "Search backend configured");
        self.search = Some(backend);
        self
    }

    pub fn with_stored_context(mut self, backend: Arc<dyn StoredContextBackend>) -> Self {
        debug!(backend = backend.name(), "Stored context backend configured");
        self.stored_context = Some(backend);
        self
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    pub fn has_stored_context(&self) -> bool {
        self.stored_context.is_some()
    }

    /// Web search for `query`, preserving backend order.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, RetrievalError> {
        let Some(backend) = &self.search else {
            return Ok(Vec::new());
        };
        let mut hits = self
            .bounded(backend.search(query, limit))
            .await
            .map_err(RetrievalError::Search)?;
        hits.truncate(limit);
        Ok(hits)
    }

    /// Stored records relevant to `query`, in backend relevance order.
    pub async fn lookup_stored_context(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredContextHit>, RetrievalError> {
        let Some(backend) = &self.stored_context else {
            return Ok(Vec::new());
        };
        let mut hits = self
            .bounded(backend.lookup(query, limit))
            .await
            .map_err(RetrievalError::Lookup)?;
        hits.truncate(limit);
        Ok(hits)
    }

    /// Query both sources concurrently and combine the outcome.
    pub async fn retrieve(
        &self,
        query: &str,
        search_limit: usize,
        context_limit: usize,
    ) -> RetrievalResult {
        let (search, stored) = tokio::join!(
            self.search(query, search_limit),
            self.lookup_stored_context(query, context_limit)
        );

        let mut result = RetrievalResult::default();
        match search {
            Ok(hits) => result.search_hits = hits,
            Err(e) => {
                warn!(error = %e, "Search degraded");
                result.search_failure = Some(e.to_string());
            }
        }
        match stored {
            Ok(hits) => result.stored_context = hits,
            Err(e) => {
                warn!(error = %e, "Stored context lookup degraded");
                result.context_failure = Some(e.to_string());
            }
        }
        debug!(
            search_hits = result.search_hits.len(),
            stored_hits = result.stored_context.len(),
            "Retrieval complete"
        );
        result
    }

    /// Hand `record` to the stored-context backend in the background.
    ///
    /// Failures are logged and never reported to the caller. Returns the
    /// task handle, or `None` when no stored-context backend is configured.
    pub fn persist(&self, record: TurnRecord) -> Option<JoinHandle<()>> {
        let backend = Arc::clone(self.stored_context.as_ref()?);
        let timeout = self.timeout;
        Some(tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, backend.persist(&record))
                .await
                .unwrap_or(Err(BackendError::Timeout(timeout)));
            match outcome {
                Ok(()) => debug!(turn_id = %record.turn_id, "Turn persisted"),
                Err(e) => warn!(
                    turn_id = %record.turn_id,
                    error = %RetrievalError::Persist(e),
                    "Turn not persisted"
                ),
            }
        }))
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(BackendError::Timeout(self.timeout)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use parley_core::TurnEnrichments;

    struct ListSearch(Vec<&'static str>);

    #[async_trait]
    impl SearchBackend for ListSearch {
        fn name(&self) -> &str {
            "list"
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>, BackendError> {
            Ok(self
                .0
                .iter()
                .map(|t| SearchHit {
                    title: t.to_string(),
                    link: format!("https://example.com/{}", t),
                    snippet: String::new(),
                    source: "list".into(),
                })
                .collect())
        }
    }

    struct DownSearch;

    #[async_trait]
    impl SearchBackend for DownSearch {
        fn name(&self) -> &str {
            "down"
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>, BackendError> {
            Err(BackendError::Transient("connection reset".into()))
        }
    }

    struct HangingSearch;

    #[async_trait]
    impl SearchBackend for HangingSearch {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>, BackendError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingContext {
        persisted: Mutex<Vec<Uuid>>,
        fail_persist: bool,
    }

    #[async_trait]
    impl StoredContextBackend for RecordingContext {
        fn name(&self) -> &str {
            "recording"
        }

        async fn lookup(
            &self,
            query: &str,
            _limit: usize,
        ) -> Result<Vec<StoredContextHit>, BackendError> {
            Ok(vec![StoredContextHit {
                record: serde_json::json!({ "query": query }),
                relevance: 1.0,
            }])
        }

        async fn persist(&self, record: &TurnRecord) -> Result<(), BackendError> {
            if self.fail_persist {
                return Err(BackendError::Fatal("read-only".into()));
            }
            self.persisted.lock().unwrap().push(record.turn_id);
            Ok(())
        }
    }

    fn record() -> TurnRecord {
        TurnRecord {
            session_id: Uuid::new_v4(),
            turn_id: Uuid::new_v4(),
            user_input: "hi".into(),
            ai_response: "hello".into(),
            topic: None,
            enrichments: TurnEnrichments::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_search_preserves_order_and_limit() {
        let gateway = RetrievalGateway::new(Duration::from_secs(1))
            .with_search(Arc::new(ListSearch(vec!["c", "a", "b"])));
        let hits = gateway.search("q", 2).await.unwrap();
        let titles: Vec<&str> = hits.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_unconfigured_sources_are_empty_without_failure() {
        let gateway = RetrievalGateway::new(Duration::from_secs(1));
        let result = gateway.retrieve("anything", 5, 5).await;
        assert!(result.is_empty());
        assert!(!result.is_degraded());
        assert!(gateway.persist(record()).is_none());
    }

    #[tokio::test]
    async fn test_failed_search_keeps_stored_context() {
        let gateway = RetrievalGateway::new(Duration::from_secs(1))
            .with_search(Arc::new(DownSearch))
            .with_stored_context(Arc::new(RecordingContext::default()));

        let result = gateway.retrieve("weather", 5, 5).await;
        assert!(result.search_hits.is_empty());
        assert!(result
            .search_failure
            .as_deref()
            .unwrap()
            .contains("connection reset"));
        assert_eq!(result.stored_context.len(), 1);
        assert!(result.context_failure.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_timeout_is_a_failure() {
        let gateway = RetrievalGateway::new(Duration::from_millis(200))
            .with_search(Arc::new(HangingSearch));
        let err = gateway.search("q", 5).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Search(BackendError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_persist_runs_in_background() {
        let backend = Arc::new(RecordingContext::default());
        let gateway = RetrievalGateway::new(Duration::from_secs(1))
            .with_stored_context(Arc::clone(&backend) as Arc<dyn StoredContextBackend>);

        let rec = record();
        let id = rec.turn_id;
        gateway.persist(rec).unwrap().await.unwrap();
        assert_eq!(*backend.persisted.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_persist_failure_is_swallowed() {
        let backend = Arc::new(RecordingContext {
            fail_persist: true,
            ..Default::default()
        });
        let gateway = RetrievalGateway::new(Duration::from_secs(1)).with_stored_context(backend);
        assert!(gateway.persist(record()).unwrap().await.is_ok());
    }
}

//! Google Custom Search JSON API backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use parley_core::{BackendError, SearchHit};

use crate::gateway::SearchBackend;

/// The Custom Search API returns at most ten results per request.
const MAX_RESULTS_PER_REQUEST: usize = 10;

const SOURCE_TAG: &str = "google";

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

/// Web search through a Google Programmable Search Engine.
pub struct GoogleSearchBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
}

impl GoogleSearchBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        engine_id: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            engine_id: engine_id.into(),
        }
    }
}

#[async_trait]
impl SearchBackend for GoogleSearchBackend {
    fn name(&self) -> &str {
        SOURCE_TAG
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, BackendError> {
        let num = limit.clamp(1, MAX_RESULTS_PER_REQUEST).to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &body));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("malformed search response: {}", e)))?;

        let hits = into_hits(body);
        debug!(hits = hits.len(), "Google search returned");
        Ok(hits)
    }
}

fn into_hits(response: SearchResponse) -> Vec<SearchHit> {
    response
        .items
        .into_iter()
        .filter(|item| !item.link.is_empty())
        .map(|item| SearchHit {
            title: item.title,
            link: item.link,
            snippet: item.snippet,
            source: SOURCE_TAG.to_string(),
        })
        .collect()
}

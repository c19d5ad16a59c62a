//! Stored-context backends: persisted turn records ranked by term overlap
//! with the query.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use parley_core::{BackendError, StoredContextHit, TurnEnrichments, TurnRecord};

use crate::db::Database;
use crate::error::RetrievalError;
use crate::gateway::StoredContextBackend;

/// How many of the newest rows a lookup scores.
const DEFAULT_SCAN_WINDOW: usize = 500;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "for", "from", "how", "i", "in",
    "is", "it", "me", "my", "of", "on", "or", "that", "the", "this", "to", "was", "what",
    "when", "where", "who", "why", "with", "you",
];

/// Distinct lowercase content terms of `text`.
fn terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Fraction of query terms that occur in the record.
fn relevance(query_terms: &[String], record: &TurnRecord) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let mut haystack = format!("{} {}", record.user_input, record.ai_response);
    if let Some(topic) = &record.topic {
        haystack.push(' ');
        haystack.push_str(topic);
    }
    let record_terms: HashSet<String> = terms(&haystack).into_iter().collect();
    let matched = query_terms.iter().filter(|t| record_terms.contains(*t)).count();
    matched as f32 / query_terms.len() as f32
}

/// Score `records` against `query`, drop non-matches, and order by relevance
/// then recency.
fn rank<'a>(
    query: &str,
    records: impl IntoIterator<Item = &'a TurnRecord>,
    limit: usize,
) -> Result<Vec<StoredContextHit>, BackendError> {
    let query_terms = terms(query);
    let mut scored: Vec<(f32, &TurnRecord)> = records
        .into_iter()
        .map(|r| (relevance(&query_terms, r), r))
        .filter(|(score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.created_at.cmp(&a.1.created_at))
    });

    scored
        .into_iter()
        .take(limit)
        .map(|(score, record)| {
            let value = serde_json::to_value(record)
                .map_err(|e| BackendError::Fatal(format!("unserializable record: {}", e)))?;
            Ok(StoredContextHit {
                record: value,
                relevance: score,
            })
        })
        .collect()
}

// =============================================================================
// In-memory
// =============================================================================

/// Keeps turn records in process memory.
#[derive(Default)]
pub struct MemoryContextStore {
    records: RwLock<Vec<TurnRecord>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StoredContextBackend for MemoryContextStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn lookup(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredContextHit>, BackendError> {
        let records = self.records.read().await;
        rank(query, records.iter(), limit)
    }

    async fn persist(&self, record: &TurnRecord) -> Result<(), BackendError> {
        let mut records = self.records.write().await;
        records.retain(|r| r.turn_id != record.turn_id);
        records.push(record.clone());
        Ok(())
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// Turn records persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteContextStore {
    db: Arc<Database>,
    scan_window: usize,
}

impl SqliteContextStore {
    pub fn open(path: &Path) -> Result<Self, RetrievalError> {
        Ok(Self::new(Arc::new(Database::open(path)?)))
    }

    pub fn in_memory() -> Result<Self, RetrievalError> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            scan_window: DEFAULT_SCAN_WINDOW,
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: &TurnRecord) -> Result<(), RetrievalError> {
        let enrichments = serde_json::to_string(&record.enrichments)
            .map_err(|e| RetrievalError::Storage(format!("Failed to encode enrichments: {}", e)))?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO turns
                    (turn_id, session_id, user_input, ai_response, topic, enrichments, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    record.turn_id.to_string(),
                    record.session_id.to_string(),
                    record.user_input,
                    record.ai_response,
                    record.topic,
                    enrichments,
                    record.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| RetrievalError::Storage(format!("Failed to save turn: {}", e)))?;
            Ok(())
        })
    }

    /// The newest `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<TurnRecord>, RetrievalError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT turn_id, session_id, user_input, ai_response, topic, enrichments, created_at
                 FROM turns
                 ORDER BY created_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
                Ok(RawTurn {
                    turn_id: row.get(0)?,
                    session_id: row.get(1)?,
                    user_input: row.get(2)?,
                    ai_response: row.get(3)?,
                    topic: row.get(4)?,
                    enrichments: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?.into_record()?);
            }
            Ok(records)
        })
    }

    pub fn count(&self) -> Result<u64, RetrievalError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }
}

struct RawTurn {
    turn_id: String,
    session_id: String,
    user_input: String,
    ai_response: String,
    topic: Option<String>,
    enrichments: String,
    created_at: i64,
}

impl RawTurn {
    fn into_record(self) -> Result<TurnRecord, RetrievalError> {
        let parse_id = |s: &str| {
            Uuid::parse_str(s).map_err(|e| RetrievalError::Storage(format!("Invalid UUID: {}", e)))
        };
        let enrichments: TurnEnrichments = serde_json::from_str(&self.enrichments)
            .map_err(|e| RetrievalError::Storage(format!("Invalid enrichments: {}", e)))?;
        let created_at = Utc
            .timestamp_millis_opt(self.created_at)
            .single()
            .ok_or_else(|| RetrievalError::Storage(format!("Invalid timestamp: {}", self.created_at)))?;

        Ok(TurnRecord {
            session_id: parse_id(&self.session_id)?,
            turn_id: parse_id(&self.turn_id)?,
            user_input: self.user_input,
            ai_response: self.ai_response,
            topic: self.topic,
            enrichments,
            created_at,
        })
    }
}

#[async_trait]
impl StoredContextBackend for SqliteContextStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn lookup(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredContextHit>, BackendError> {
        let store = self.clone();
        let records = tokio::task::spawn_blocking(move || store.recent(store.scan_window))
            .await
            .map_err(|e| BackendError::Transient(format!("lookup task failed: {}", e)))??;
        debug!(scanned = records.len(), "Scoring stored turns");
        rank(query, records.iter(), limit)
    }

    async fn persist(&self, record: &TurnRecord) -> Result<(), BackendError> {
        let store = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.insert(&record))
            .await
            .map_err(|e| BackendError::Transient(format!("persist task failed: {}", e)))??;
        Ok(())
    }
}

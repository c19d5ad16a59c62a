//! Conversation context management.
//!
//! Each session keeps a bounded rolling history of exchanges, per-topic
//! mention records, and a small state machine (current topic, open
//! questions). State only changes through [`ConversationContext::fold`],
//! which runs under a synchronous lock so a turn is folded completely or
//! not at all.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use parley_core::{EnrichmentBundle, GenerationResult, PriorExchange, Turn};

use crate::error::ChatError;
use crate::topic::{extract_topic, is_question};

// =============================================================================
// Records
// =============================================================================

/// One folded exchange. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub turn_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_input: String,
    pub ai_response: String,
    pub topic: Option<String>,
    /// Analysis the topic was derived from.
    pub analysis: EnrichmentBundle,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub first_mention: DateTime<Utc>,
    pub last_mention: DateTime<Utc>,
    pub mention_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenQuestion {
    pub question: String,
    pub asked_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub current_topic: Option<String>,
    /// Questions in the order they were asked. Nothing removes them.
    pub open_questions: Vec<OpenQuestion>,
    pub last_update: DateTime<Utc>,
}

/// Immutable copy of a session's context at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: Uuid,
    pub history: Vec<ContextEntry>,
    pub current_topic: Option<String>,
    pub topics: BTreeMap<String, TopicRecord>,
    pub open_questions: Vec<OpenQuestion>,
    pub last_update: DateTime<Utc>,
    /// Turns folded over the session's life, including evicted ones.
    pub turn_count: u64,
}

// =============================================================================
// ConversationContext
// =============================================================================

/// Rolling context of a single conversation.
#[derive(Debug)]
pub struct ConversationContext {
    capacity: usize,
    history: VecDeque<ContextEntry>,
    topics: BTreeMap<String, TopicRecord>,
    state: ConversationState,
    turn_count: u64,
}

impl ConversationContext {
    /// Empty context holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity),
            topics: BTreeMap::new(),
            state: ConversationState {
                current_topic: None,
                open_questions: Vec::new(),
                last_update: Utc::now(),
            },
            turn_count: 0,
        }
    }

    /// Fold one completed turn into the context.
    pub fn fold(
        &mut self,
        turn: &Turn,
        generation: &GenerationResult,
        analysis: &EnrichmentBundle,
    ) -> &ConversationState {
        let topic = extract_topic(analysis);
        let entry = ContextEntry {
            turn_id: turn.id,
            timestamp: turn.received_at,
            user_input: turn.text.clone(),
            ai_response: generation.text.clone(),
            topic: topic.clone(),
            analysis: analysis.clone(),
        };

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(entry);
        self.turn_count += 1;

        if let Some(topic) = topic {
            self.topics
                .entry(topic.clone())
                .and_modify(|record| {
                    record.last_mention = turn.received_at;
                    record.mention_count += 1;
                })
                .or_insert(TopicRecord {
                    first_mention: turn.received_at,
                    last_mention: turn.received_at,
                    mention_count: 1,
                });
            self.state.current_topic = Some(topic);
        }

        if is_question(&turn.text) {
            self.state.open_questions.push(OpenQuestion {
                question: turn.text.clone(),
                asked_at: turn.received_at,
            });
        }

        self.state.last_update = turn.received_at;
        &self.state
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    /// The last `k` exchanges, oldest first.
    pub fn recent_exchanges(&self, k: usize) -> Vec<PriorExchange> {
        let skip = self.history.len().saturating_sub(k);
        self.history
            .iter()
            .skip(skip)
            .map(|e| PriorExchange {
                user: e.user_input.clone(),
                assistant: e.ai_response.clone(),
            })
            .collect()
    }

    pub fn snapshot(&self, session_id: Uuid) -> ContextSnapshot {
        ContextSnapshot {
            session_id,
            history: self.history.iter().cloned().collect(),
            current_topic: self.state.current_topic.clone(),
            topics: self.topics.clone(),
            open_questions: self.state.open_questions.clone(),
            last_update: self.state.last_update,
            turn_count: self.turn_count,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// A conversation session: its context plus the lock that serializes its
/// turns.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    context: Mutex<ConversationContext>,
    turn_lock: tokio::sync::Mutex<()>,
    /// Last time a turn resolved this session.
    last_seen: Mutex<DateTime<Utc>>,
}

impl Session {
    fn new(id: Uuid, capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            context: Mutex::new(ConversationContext::new(capacity)),
            turn_lock: tokio::sync::Mutex::new(()),
            last_seen: Mutex::new(now),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Wait for this session's turn slot. Waiters are served in arrival
    /// order.
    pub async fn lock_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.turn_lock.lock().await
    }

    pub fn snapshot(&self) -> Result<ContextSnapshot, ChatError> {
        Ok(self.context()?.snapshot(self.id))
    }

    pub fn recent_exchanges(&self, k: usize) -> Result<Vec<PriorExchange>, ChatError> {
        Ok(self.context()?.recent_exchanges(k))
    }

    /// Fold a completed turn and return the new snapshot.
    pub(crate) fn fold(
        &self,
        turn: &Turn,
        generation: &GenerationResult,
        analysis: &EnrichmentBundle,
    ) -> Result<ContextSnapshot, ChatError> {
        let mut context = self.context()?;
        context.fold(turn, generation, analysis);
        Ok(context.snapshot(self.id))
    }

    /// True while a turn holds (or is acquiring) the turn slot.
    fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    fn touch(&self) -> Result<(), ChatError> {
        *self.seen()? = Utc::now();
        Ok(())
    }

    /// Latest of the last fold and the last resolve.
    fn last_active(&self) -> Result<DateTime<Utc>, ChatError> {
        let last_update = self.context()?.state().last_update;
        let last_seen = *self.seen()?;
        Ok(last_update.max(last_seen))
    }

    fn seen(&self) -> Result<std::sync::MutexGuard<'_, DateTime<Utc>>, ChatError> {
        self.last_seen.lock().map_err(|e| {
            ChatError::InvariantViolation(format!("activity lock poisoned for {}: {}", self.id, e))
        })
    }

    fn context(&self) -> Result<std::sync::MutexGuard<'_, ConversationContext>, ChatError> {
        self.context.lock().map_err(|e| {
            ChatError::InvariantViolation(format!("context lock poisoned for {}: {}", self.id, e))
        })
    }
}

/// Summary row for session listings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub turn_count: u64,
    pub current_topic: Option<String>,
}

// =============================================================================
// ContextStore
// =============================================================================

/// Registry of conversation sessions keyed by id.
pub struct ContextStore {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    history_capacity: usize,
    session_timeout: Duration,
}

impl ContextStore {
    pub fn new(history_capacity: usize, session_timeout_minutes: u32) -> Self {
        Self::with_session_timeout(
            history_capacity,
            std::time::Duration::from_secs(u64::from(session_timeout_minutes) * 60),
        )
    }

    /// Store whose sessions expire after `timeout` without activity.
    pub fn with_session_timeout(history_capacity: usize, timeout: std::time::Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_capacity,
            session_timeout: Duration::from_std(timeout)
                .unwrap_or_else(|_| Duration::days(36_500)),
        }
    }

    /// Create a session with a fresh id.
    pub fn create(&self) -> Result<Arc<Session>, ChatError> {
        self.open(Uuid::new_v4())
    }

    /// Return the live session `id`, creating it when absent or expired.
    ///
    /// Creating a session also drops every other expired session.
    pub fn open(&self, id: Uuid) -> Result<Arc<Session>, ChatError> {
        let mut sessions = self.write()?;
        if let Some(session) = sessions.get(&id) {
            if !self.is_expired(session)? {
                session.touch()?;
                return Ok(Arc::clone(session));
            }
            info!(session_id = %id, "Session expired; starting over");
        }
        let purged = self.purge_locked(&mut sessions)?;
        if purged > 0 {
            debug!(purged, "Expired sessions dropped");
        }
        let session = Arc::new(Session::new(id, self.history_capacity));
        sessions.insert(id, Arc::clone(&session));
        debug!(session_id = %id, "Session created");
        Ok(session)
    }

    /// Resolve the session for a turn.
    ///
    /// A known, live id returns that session. An unknown or expired id, or
    /// no id at all, yields a new session under a fresh id.
    pub fn resolve(&self, requested: Option<Uuid>) -> Result<Arc<Session>, ChatError> {
        if let Some(id) = requested {
            let mut sessions = self.write()?;
            if let Some(session) = sessions.get(&id) {
                if !self.is_expired(session)? {
                    session.touch()?;
                    return Ok(Arc::clone(session));
                }
                sessions.remove(&id);
                info!(session_id = %id, "Session expired; removed");
            } else {
                debug!(session_id = %id, "Unknown session requested");
            }
        }
        self.create()
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Arc<Session>>, ChatError> {
        Ok(self.read()?.get(&id).cloned())
    }

    /// Fold a completed turn into session `id` and return the new snapshot.
    ///
    /// The session must still be registered; folding into a removed session
    /// is a programming error.
    pub fn fold(
        &self,
        id: Uuid,
        turn: &Turn,
        generation: &GenerationResult,
        analysis: &EnrichmentBundle,
    ) -> Result<ContextSnapshot, ChatError> {
        let session = self.get(id)?.ok_or_else(|| {
            ChatError::InvariantViolation(format!("fold into unknown session {}", id))
        })?;
        session.fold(turn, generation, analysis)
    }

    pub fn snapshot(&self, id: Uuid) -> Result<ContextSnapshot, ChatError> {
        self.get(id)?
            .ok_or(ChatError::SessionNotFound(id))?
            .snapshot()
    }

    pub fn remove(&self, id: Uuid) -> Result<(), ChatError> {
        match self.write()?.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ChatError::SessionNotFound(id)),
        }
    }

    pub fn list(&self) -> Result<Vec<SessionSummary>, ChatError> {
        let sessions = self.read()?;
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            let snapshot = session.snapshot()?;
            summaries.push(SessionSummary {
                id: session.id,
                created_at: session.created_at,
                last_update: snapshot.last_update,
                turn_count: snapshot.turn_count,
                current_topic: snapshot.current_topic,
            });
        }
        summaries.sort_by(|a, b| b.last_update.cmp(&a.last_update));
        Ok(summaries)
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, ChatError> {
        let mut sessions = self.write()?;
        self.purge_locked(&mut sessions)
    }

    fn purge_locked(
        &self,
        sessions: &mut HashMap<Uuid, Arc<Session>>,
    ) -> Result<usize, ChatError> {
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            if self.is_expired(session)? {
                expired.push(*id);
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        Ok(expired.len())
    }

    pub fn len(&self) -> Result<usize, ChatError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ChatError> {
        Ok(self.read()?.is_empty())
    }

    /// A session with a turn in flight never expires.
    fn is_expired(&self, session: &Session) -> Result<bool, ChatError> {
        if session.is_busy() {
            return Ok(false);
        }
        Ok(Utc::now() - session.last_active()? > self.session_timeout)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<Session>>>, ChatError> {
        self.sessions
            .read()
            .map_err(|e| ChatError::InvariantViolation(format!("session lock poisoned: {}", e)))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<Session>>>, ChatError> {
        self.sessions
            .write()
            .map_err(|e| ChatError::InvariantViolation(format!("session lock poisoned: {}", e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

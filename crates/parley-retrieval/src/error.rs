use parley_core::{BackendError, ParleyError};
use thiserror::Error;

/// Errors that can occur in the retrieval layer.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("search failed: {0}")]
    Search(BackendError),
    #[error("stored context lookup failed: {0}")]
    Lookup(BackendError),
    #[error("persist failed: {0}")]
    Persist(BackendError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for RetrievalError {
    fn from(e: rusqlite::Error) -> Self {
        RetrievalError::Storage(e.to_string())
    }
}

impl From<RetrievalError> for ParleyError {
    fn from(e: RetrievalError) -> Self {
        match e {
            RetrievalError::Storage(msg) => ParleyError::Storage(msg),
            RetrievalError::Search(b) | RetrievalError::Lookup(b) | RetrievalError::Persist(b) => {
                ParleyError::Backend(b)
            }
        }
    }
}

/// Storage failures seen by the gateway are transient: the next turn may
/// succeed against the same database.
impl From<RetrievalError> for BackendError {
    fn from(e: RetrievalError) -> Self {
        match e {
            RetrievalError::Search(b) | RetrievalError::Lookup(b) | RetrievalError::Persist(b) => b,
            RetrievalError::Storage(msg) => BackendError::Transient(msg),
        }
    }
}

//! Retrieval layer for Parley.
//!
//! Two independent sources feed each turn: a web search backend and a
//! stored-context backend holding earlier turns. The gateway queries both
//! concurrently and turns a failing source into an empty result with a
//! failure flag.

pub mod db;
pub mod error;
pub mod gateway;
pub mod search;
pub mod store;

pub use db::Database;
pub use error::RetrievalError;
pub use gateway::{RetrievalGateway, SearchBackend, StoredContextBackend};
pub use search::GoogleSearchBackend;
pub use store::{MemoryContextStore, SqliteContextStore};

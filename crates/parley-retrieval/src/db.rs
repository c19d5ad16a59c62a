//! SQLite connection management for the stored-context backend.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use crate::error::RetrievalError;

const SCHEMA_VERSION: i64 = 1;

/// A single rusqlite Connection behind a Mutex, since Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, RetrievalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RetrievalError::Storage(format!("Failed to create data dir: {}", e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| RetrievalError::Storage(format!("Failed to open database: {}", e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| RetrievalError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Context database opened at {}", path.display());
        Self::with_schema(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, RetrievalError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RetrievalError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self, RetrievalError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the connection. The mutex is held for the whole closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, RetrievalError>
    where
        F: FnOnce(&Connection) -> Result<T, RetrievalError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RetrievalError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

fn migrate(conn: &Connection) -> Result<(), RetrievalError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS turns (
            turn_id      TEXT PRIMARY KEY NOT NULL,
            session_id   TEXT NOT NULL,
            user_input   TEXT NOT NULL,
            ai_response  TEXT NOT NULL,
            topic        TEXT,
            enrichments  TEXT NOT NULL DEFAULT '{}',
            created_at   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_turns_created
            ON turns (created_at DESC);

        PRAGMA user_version = 1;
        ",
    )
    .map_err(|e| RetrievalError::Storage(format!("Failed to apply schema: {}", e)))?;

    info!(version = SCHEMA_VERSION, "Context database schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database_has_schema() {
        let db = Database::in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'turns'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reopen_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("context.db");
        drop(Database::open(&path).unwrap());

        let db = Database::open(&path).unwrap();
        let version: i64 = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}

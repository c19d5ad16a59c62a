use std::time::Duration;

use thiserror::Error;

/// Top-level error type for Parley infrastructure.
///
/// Covers configuration, storage and serialization failures. Per-crate error
/// types convert into and out of this one so that `?` works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl From<toml::de::Error> for ParleyError {
    fn from(err: toml::de::Error) -> Self {
        ParleyError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ParleyError {
    fn from(err: toml::ser::Error) -> Self {
        ParleyError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        ParleyError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

/// Failure reported by an external collaborator (generation, enrichment,
/// search or stored-context backend).
///
/// Transient failures and timeouts degrade the stage that issued the call.
/// Fatal failures are surfaced only when the stage itself is fatal
/// (primary generation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("fatal backend failure: {0}")]
    Fatal(String),

    #[error("backend call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// Whether a retry of the same call could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Timeout(_))
    }

    /// Classify a non-success HTTP status. Rate limits and server errors
    /// are transient; everything else (auth, bad request) is fatal.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, truncate(body, 200));
        match status {
            408 | 429 | 500 | 502 | 503 | 504 | 529 => BackendError::Transient(message),
            _ => BackendError::Fatal(message),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParleyError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ParleyError = io_err.into();
        assert!(matches!(err, ParleyError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ParleyError = json_err.into();
        assert!(matches!(err, ParleyError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: ParleyError = toml_err.into();
        assert!(matches!(err, ParleyError::Config(_)));
    }

    #[test]
    fn test_backend_error_display() {
        assert_eq!(
            BackendError::Transient("connection reset".into()).to_string(),
            "transient backend failure: connection reset"
        );
        assert_eq!(
            BackendError::Fatal("quota exhausted".into()).to_string(),
            "fatal backend failure: quota exhausted"
        );
        assert_eq!(
            BackendError::Timeout(Duration::from_millis(1500)).to_string(),
            "backend call timed out after 1500ms"
        );
    }

    #[test]
    fn test_backend_error_transient_classification() {
        assert!(BackendError::Transient("x".into()).is_transient());
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!BackendError::Fatal("x".into()).is_transient());
        assert!(!BackendError::Unsupported("x".into()).is_transient());
    }

    #[test]
    fn test_backend_error_from_http_status() {
        assert!(BackendError::from_status(503, "busy").is_transient());
        assert!(BackendError::from_status(429, "slow down").is_transient());
        let fatal = BackendError::from_status(401, "bad key");
        assert_eq!(fatal, BackendError::Fatal("HTTP 401: bad key".into()));

        let long = "x".repeat(500);
        match BackendError::from_status(500, &long) {
            BackendError::Transient(msg) => assert_eq!(msg.len(), "HTTP 500: ".len() + 200),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_backend_error_wraps_into_parley_error() {
        let err: ParleyError = BackendError::Fatal("down".into()).into();
        assert!(matches!(err, ParleyError::Backend(_)));
        assert_eq!(err.to_string(), "Backend error: fatal backend failure: down");
    }
}

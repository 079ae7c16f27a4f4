//! Error types for satchel.

use thiserror::Error;

/// Result type alias using satchel's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for satchel operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input (bad file name, malformed mime type, bad policy).
    /// Fatal to the call; never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found (unknown file id or virtual-file name).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Embedding backend call failed. Aborts the current run; batches
    /// persisted before the failure stay durable.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Query engine failure. The bridge inspects the message for the
    /// missing-table shape; everything else propagates verbatim.
    #[error("Engine query error: {0}")]
    EngineQuery(String),

    /// Database operation failed (wraps sqlx::Error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("empty name".to_string());
        assert_eq!(err.to_string(), "Invalid input: empty name");
    }

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("abc123".to_string());
        assert_eq!(err.to_string(), "Not found: abc123");
    }

    #[test]
    fn test_error_display_backend() {
        let err = Error::Backend("HTTP 500".to_string());
        assert_eq!(err.to_string(), "Backend error: HTTP 500");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}

//! Error types for Praxis

use thiserror::Error;

/// Result type alias using Praxis's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Praxis
///
/// Nothing raised by sandboxed code ever becomes one of these; script failures
/// are reported as test verdicts. These cover the host side only.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The sandbox could not start or manage a run
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::Json(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Sandbox("thread spawn failed".to_string());
        assert_eq!(err.to_string(), "Sandbox error: thread spawn failed");
    }

    #[test]
    fn test_client_error_classification() {
        assert!(Error::InvalidInput("bad".into()).is_client_error());
        assert!(!Error::Sandbox("boom".into()).is_client_error());

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(Error::from(json_err).is_client_error());
    }
}

//! Error types for memroute-core.

use thiserror::Error;

/// Result type alias using memroute-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by backend executors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Backend error ({backend}): {message}")]
    Backend { backend: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error attributed to a named backend
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_message() {
        let err = Error::backend("semantic", "connection refused");
        assert_eq!(err.to_string(), "Backend error (semantic): connection refused");
        assert!(!err.is_not_found());
        assert!(Error::NotFound("abc".into()).is_not_found());
    }
}

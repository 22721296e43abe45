//! Error types for Stowage
//!
//! Library operations return `StowageResult<T>`. Store lookups use the
//! separate [`Miss`] type so that every reason a cached value is unusable
//! funnels into one recoverable path.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Stowage operations
pub type StowageResult<T> = Result<T, StowageError>;

/// Boxed error produced by user-supplied computations
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All errors that can occur in Stowage
#[derive(Error, Debug)]
pub enum StowageError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Key errors
    #[error("Argument `{argument}` of {function} cannot be hashed: {reason}")]
    UnhashableArgument {
        function: String,
        argument: String,
        reason: String,
    },

    #[error("Invalid call to {function}: {reason}")]
    InvalidCall { function: String, reason: String },

    // Blob store errors
    #[error("Object not found in bucket {bucket}: {key}")]
    NotFound { bucket: String, key: String },

    #[error("Not a content hash: {0}")]
    InvalidHash(String),

    #[error("Blob backend error during {operation}: {reason}")]
    Backend { operation: String, reason: String },

    // Registry errors
    #[error("No version available for {identifier}: {source}")]
    VersionNotFound {
        identifier: String,
        #[source]
        source: BoxError,
    },

    #[error("Unknown registry identifier: {0}")]
    UnknownIdentifier(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StowageError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a blob backend error
    pub fn backend(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Run: stowage config init --force"),
            Self::NotFound { .. } => {
                Some("The hash must come from a previous `stowage blob put` against the same bucket")
            }
            Self::InvalidHash(_) => Some("Content hashes are 64 lowercase hex characters"),
            Self::UnknownIdentifier(_) => Some("Run: stowage registry list"),
            _ => None,
        }
    }
}

/// Why a store could not produce a value
///
/// Every variant is recoverable by recomputing the value. Callers that only
/// care about hit/miss can ignore the reason; it exists for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Miss {
    /// Key was never written or has been evicted
    Absent,
    /// Entry outlived its TTL
    Expired,
    /// Stored payload could not be decoded
    Malformed(String),
    /// Backend could not be reached
    Unavailable(String),
}

impl Miss {
    /// Whether the miss was caused by a failing backend rather than the data
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl fmt::Display for Miss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "cache miss: key absent"),
            Self::Expired => write!(f, "cache miss: entry expired"),
            Self::Malformed(reason) => write!(f, "cache miss: malformed entry ({})", reason),
            Self::Unavailable(reason) => write!(f, "cache miss: backend unavailable ({})", reason),
        }
    }
}

impl std::error::Error for Miss {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StowageError::NotFound {
            bucket: "artifacts".to_string(),
            key: "items/abc.json".to_string(),
        };
        assert!(err.to_string().contains("items/abc.json"));
    }

    #[test]
    fn error_hint() {
        let err = StowageError::UnknownIdentifier("models.vocab".to_string());
        assert_eq!(err.hint(), Some("Run: stowage registry list"));
        assert!(StowageError::Internal("x".to_string()).hint().is_none());
    }

    #[test]
    fn version_not_found_keeps_source() {
        let source: BoxError = "factory exploded".into();
        let err = StowageError::VersionNotFound {
            identifier: "models.vocab".to_string(),
            source,
        };
        let chained = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(chained.as_deref(), Some("factory exploded"));
    }

    #[test]
    fn miss_transient() {
        assert!(Miss::Unavailable("refused".to_string()).is_transient());
        assert!(!Miss::Absent.is_transient());
        assert!(!Miss::Malformed("eof".to_string()).is_transient());
    }
}

/// Unified error handling for the votier coordination core
///
/// Two layers of errors exist. `StorageError` is the explicit result type
/// returned by every record store backend; the tiered storage manager logs
/// and absorbs it. `CoreError` is what callers of the core can observe:
/// not-found conditions raised at the manager boundaries, and configuration
/// or connection failures raised while the core is being built.

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::config::ConfigError;

/// Main error type for coordination core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// A record or node id that is not present
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// Configuration errors, raised during initialization only
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Backend construction failures (e.g. remote KV unreachable at startup)
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Health check errors
    #[error("Health check failed: {message}")]
    HealthCheck { message: String },

    /// Embedding collaborator errors
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Kind of resource named by a `NotFound` error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Record,
    Node,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Record => write!(f, "Record"),
            ResourceKind::Node => write!(f, "Node"),
        }
    }
}

/// Failures reported by a record store backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Invalid key: {key}")]
    InvalidKey { key: String },
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type alias for backend operations
pub type StorageResult<T> = Result<T, StorageError>;

impl CoreError {
    /// Create a not-found error for a record key
    pub fn record_not_found<S: Into<String>>(key: S) -> Self {
        CoreError::NotFound {
            kind: ResourceKind::Record,
            id: key.into(),
        }
    }

    /// Create a not-found error for a node id
    pub fn node_not_found<S: Into<String>>(node_id: S) -> Self {
        CoreError::NotFound {
            kind: ResourceKind::Node,
            id: node_id.into(),
        }
    }

    /// Create a health check error
    pub fn health_check<S: Into<String>>(message: S) -> Self {
        CoreError::HealthCheck {
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding<S: Into<String>>(message: S) -> Self {
        CoreError::Embedding {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        CoreError::Internal {
            message: message.into(),
        }
    }

    /// True for the not-found condition the gateway maps to a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }
}

impl StorageError {
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        StorageError::Protocol {
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        StorageError::Connection {
            message: message.into(),
        }
    }

    pub fn invalid_key<S: Into<String>>(key: S) -> Self {
        StorageError::InvalidKey { key: key.into() }
    }

    /// Transport failures that may succeed on a later call
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Connection { .. })
    }

    /// Severity used when the tiered manager logs an absorbed failure
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            StorageError::Io(_) | StorageError::Connection { .. } => ErrorSeverity::Warning,
            StorageError::Serialization(_) | StorageError::Protocol { .. } => ErrorSeverity::Error,
            StorageError::InvalidKey { .. } => ErrorSeverity::Info,
        }
    }
}

/// Severity of an absorbed backend failure, mapped to a log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Data or protocol corruption; the call will keep failing
    Error,
    /// Transport trouble that may clear up
    Warning,
    /// Rejected input, not a backend fault
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let error = CoreError::record_not_found("abc123");
        assert!(error.is_not_found());
        assert_eq!(error.to_string(), "Record not found: abc123");

        let error = CoreError::node_not_found("node-1");
        assert_eq!(error.to_string(), "Node not found: node-1");
    }

    #[test]
    fn test_storage_error_severity() {
        let refused = StorageError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert_eq!(refused.severity(), ErrorSeverity::Warning);
        assert!(refused.is_recoverable());

        let dropped = StorageError::connection("reset by peer");
        assert_eq!(dropped.severity(), ErrorSeverity::Warning);
        assert!(dropped.is_recoverable());

        let garbled = StorageError::protocol("unexpected reply");
        assert_eq!(garbled.severity(), ErrorSeverity::Error);
        assert!(!garbled.is_recoverable());

        let bad_key = StorageError::invalid_key("a/b");
        assert_eq!(bad_key.severity(), ErrorSeverity::Info);
        assert!(!bad_key.is_recoverable());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: CoreError = StorageError::invalid_key("../etc").into();
        assert!(matches!(err, CoreError::Storage(StorageError::InvalidKey { .. })));
        assert_eq!(err.to_string(), "Storage error: Invalid key: ../etc");
    }
}

//! Error types for the document store boundary.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur at the document store boundary.
///
/// This is a closed set: callers classify failures by matching on the
/// variant (or via [`StoreError::is_network`]), never by probing message
/// contents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The operation did not complete within the transport's deadline.
    #[error("network timeout")]
    Timeout,

    /// The remote host could not be resolved or reached.
    #[error("host unreachable: {host}")]
    Unreachable {
        /// The host that could not be reached.
        host: String,
    },

    /// A generic network-level failure.
    #[error("network request failed: {0}")]
    Network(String),

    /// The server rejected the supplied credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The connection URI could not be parsed or is not supported.
    #[error("invalid store uri: {0}")]
    InvalidUri(String),

    /// The server reported an error.
    #[error("server error: {0}")]
    Server(String),

    /// The store or session has been closed.
    #[error("store closed")]
    Closed,
}

impl StoreError {
    /// Returns true for failures caused by the network rather than by the
    /// server or the configuration.
    ///
    /// Network-class failures mean the remote may be fine and simply out of
    /// reach, so callers report them as `Offline` rather than `Error`.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout | StoreError::Unreachable { .. } | StoreError::Network(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_classification() {
        assert!(StoreError::Timeout.is_network());
        assert!(StoreError::Unreachable { host: "db.local".into() }.is_network());
        assert!(StoreError::Network("connection reset".into()).is_network());

        assert!(!StoreError::Unauthorized("bad password".into()).is_network());
        assert!(!StoreError::InvalidUri("not a uri".into()).is_network());
        assert!(!StoreError::Server("internal error".into()).is_network());
        assert!(!StoreError::Closed.is_network());
    }

    #[test]
    fn error_display() {
        assert_eq!(StoreError::Timeout.to_string(), "network timeout");
        let err = StoreError::Unreachable { host: "inventory.example.com".into() };
        assert!(err.to_string().contains("inventory.example.com"));
    }
}

//! Error types for the sync core.

use stockpile_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while orchestrating synchronization.
///
/// Nothing in this enum escapes the subsystem: orchestrator tasks convert
/// every error into a status update before finishing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A store-boundary failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A replication session ended in a way the orchestrator cannot
    /// interpret.
    #[error("replication failed: {0}")]
    Replication(String),

    /// The orchestration was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

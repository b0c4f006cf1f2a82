//! Per-server sync status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse-grained, user-facing sync state of one configured server.
///
/// Exactly one status exists per server at any time; writes are
/// last-write-wins and only the orchestrator that currently owns the
/// server identifier writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Not evaluated yet: sync is disabled or the local store is not ready.
    /// Rendered as `-`.
    NotStarted,
    /// The server is disabled in its configuration.
    Disabled,
    /// The device has no network connectivity, or the server is out of
    /// reach for network-level reasons.
    Offline,
    /// A reconciliation pass is under way and this server has not been
    /// evaluated yet.
    Initializing,
    /// Connecting or replicating failed for a non-network reason.
    Error,
    /// Replication is running and at least one direction has not caught up.
    Syncing,
    /// Connected, with both directions caught up.
    Online,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::NotStarted => "-",
            SyncStatus::Disabled => "Disabled",
            SyncStatus::Offline => "Offline",
            SyncStatus::Initializing => "Initializing",
            SyncStatus::Error => "Error",
            SyncStatus::Syncing => "Syncing",
            SyncStatus::Online => "Online",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_renders_as_dash() {
        assert_eq!(SyncStatus::NotStarted.to_string(), "-");
        assert_eq!(SyncStatus::Online.to_string(), "Online");
        assert_eq!(SyncStatus::Syncing.to_string(), "Syncing");
    }
}

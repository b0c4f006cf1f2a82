//! Sync configuration inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stockpile_store::Credentials;

/// User-editable configuration of one remote server.
///
/// The server's stable identifier is the key under which this record is
/// stored in [`SyncInputs::servers`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name.
    pub name: String,
    /// Connection URI of the remote store.
    pub uri: String,
    /// Credentials for the remote store.
    pub credentials: Credentials,
    /// Whether this server participates in sync.
    pub enabled: bool,
}

impl ServerConfig {
    /// Creates an enabled server configuration.
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            credentials,
            enabled: true,
        }
    }

    /// Sets the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Tuning knobs for the sync subsystem.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Documents per replicated batch.
    pub batch_size: usize,
    /// Upper bound, in bytes, on stored error messages.
    pub error_message_limit: usize,
}

impl SyncOptions {
    /// Creates options with the default tuning.
    pub fn new() -> Self {
        Self {
            batch_size: 20,
            error_message_limit: 8000,
        }
    }

    /// Sets the replication batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the stored-error-message bound.
    pub fn with_error_message_limit(mut self, limit: usize) -> Self {
        self.error_message_limit = limit;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// One snapshot of the reconciliation inputs: the global sync toggle and
/// the keyed set of configured servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncInputs {
    /// Global sync-enabled flag.
    pub enabled: bool,
    /// Configured servers, keyed by stable identifier.
    pub servers: BTreeMap<String, ServerConfig>,
}

impl SyncInputs {
    /// A disabled configuration with no servers.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// An enabled configuration over the given servers.
    pub fn enabled(servers: BTreeMap<String, ServerConfig>) -> Self {
        Self { enabled: true, servers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.batch_size, 20);
        assert_eq!(options.error_message_limit, 8000);
    }

    #[test]
    fn options_builder() {
        let options = SyncOptions::new().with_batch_size(50).with_error_message_limit(200);
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.error_message_limit, 200);
    }

    #[test]
    fn server_config_roundtrips_through_json() {
        let config = ServerConfig::new(
            "Warehouse",
            "https://db.example.com/inventory",
            Credentials::new("clerk", "pw"),
        )
        .with_enabled(false);

        let json = serde_json::to_string(&config).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert!(!back.enabled);
    }
}

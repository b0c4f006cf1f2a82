//! Shared per-server sync state, consumed by the UI.

use crate::status::SyncStatus;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::watch;

/// In-flight replication counters for one server.
///
/// All four fields are monotonically refreshed within one orchestration and
/// reset when a new orchestration starts. Absent fields mean the value has
/// not been observed yet (or its metadata fetch failed).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationProgress {
    /// Update sequence of the local store.
    pub local_update_seq: Option<u64>,
    /// Update sequence of the remote store.
    pub remote_update_seq: Option<u64>,
    /// Checkpoint reached by the push direction.
    pub push_last_seq: Option<u64>,
    /// Checkpoint reached by the pull direction.
    pub pull_last_seq: Option<u64>,
}

impl ReplicationProgress {
    /// Merges another progress record into this one, taking only the
    /// fields the update actually carries.
    pub fn apply(&mut self, update: &ReplicationProgress) {
        if update.local_update_seq.is_some() {
            self.local_update_seq = update.local_update_seq;
        }
        if update.remote_update_seq.is_some() {
            self.remote_update_seq = update.remote_update_seq;
        }
        if update.push_last_seq.is_some() {
            self.push_last_seq = update.push_last_seq;
        }
        if update.pull_last_seq.is_some() {
            self.pull_last_seq = update.pull_last_seq;
        }
    }
}

/// The state record of one configured server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Current coarse-grained status.
    pub status: SyncStatus,
    /// Last recorded error message, bounded in length.
    pub last_error_message: Option<String>,
    /// Time of the last fully caught-up sync.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Replication progress counters.
    pub progress: ReplicationProgress,
}

impl Default for ServerEntry {
    fn default() -> Self {
        Self {
            status: SyncStatus::NotStarted,
            last_error_message: None,
            last_synced_at: None,
            progress: ReplicationProgress::default(),
        }
    }
}

/// Shared store of per-server sync state.
///
/// Writers are the sync manager and whichever orchestrator currently owns a
/// server identifier; readers are UIs and tests. Every mutation bumps a
/// revision observable through [`SyncStateStore::subscribe`].
#[derive(Debug)]
pub struct SyncStateStore {
    servers: RwLock<BTreeMap<String, ServerEntry>>,
    revision: watch::Sender<u64>,
    error_message_limit: usize,
}

impl SyncStateStore {
    /// Creates an empty store with the given error-message bound.
    pub fn new(error_message_limit: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            servers: RwLock::new(BTreeMap::new()),
            revision,
            error_message_limit,
        }
    }

    /// Creates an entry for `id` if none exists.
    pub fn ensure_server(&self, id: &str) {
        let created = {
            let mut servers = self.servers.write();
            if servers.contains_key(id) {
                false
            } else {
                servers.insert(id.to_string(), ServerEntry::default());
                true
            }
        };
        if created {
            self.bump();
        }
    }

    /// Drops entries for servers no longer configured.
    pub fn retain_servers<'a>(&self, ids: impl IntoIterator<Item = &'a String>) {
        let keep: Vec<&String> = ids.into_iter().collect();
        let removed = {
            let mut servers = self.servers.write();
            let before = servers.len();
            servers.retain(|id, _| keep.iter().any(|k| *k == id));
            before != servers.len()
        };
        if removed {
            self.bump();
        }
    }

    /// Sets one server's status.
    pub fn update_server_status(&self, id: &str, status: SyncStatus) {
        self.servers.write().entry(id.to_string()).or_default().status = status;
        self.bump();
    }

    /// Sets every known server's status.
    pub fn update_all_server_status(&self, status: SyncStatus) {
        {
            let mut servers = self.servers.write();
            for entry in servers.values_mut() {
                entry.status = status;
            }
        }
        self.bump();
    }

    /// Records one server's last error message, truncated to the
    /// configured bound.
    pub fn set_server_last_error_message(&self, id: &str, message: impl Into<String>) {
        let message = truncate_to_boundary(message.into(), self.error_message_limit);
        self.servers
            .write()
            .entry(id.to_string())
            .or_default()
            .last_error_message = Some(message);
        self.bump();
    }

    /// Records the time of one server's last caught-up sync.
    pub fn update_last_synced_at(&self, id: &str, at: DateTime<Utc>) {
        self.servers
            .write()
            .entry(id.to_string())
            .or_default()
            .last_synced_at = Some(at);
        self.bump();
    }

    /// Merges a progress update into one server's counters.
    pub fn update_sync_progress(&self, id: &str, update: &ReplicationProgress) {
        self.servers
            .write()
            .entry(id.to_string())
            .or_default()
            .progress
            .apply(update);
        self.bump();
    }

    /// Clears one server's progress counters (a new orchestration starts
    /// from scratch).
    pub fn reset_sync_progress(&self, id: &str) {
        self.servers
            .write()
            .entry(id.to_string())
            .or_default()
            .progress = ReplicationProgress::default();
        self.bump();
    }

    /// Snapshot of one server's state.
    pub fn server(&self, id: &str) -> Option<ServerEntry> {
        self.servers.read().get(id).cloned()
    }

    /// Snapshot of every server's state.
    pub fn servers(&self) -> BTreeMap<String, ServerEntry> {
        self.servers.read().clone()
    }

    /// Subscribes to the revision counter; the value changes on every
    /// mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for SyncStateStore {
    fn default() -> Self {
        Self::new(crate::config::SyncOptions::default().error_message_limit)
    }
}

/// Truncates to at most `limit` bytes without splitting a character.
fn truncate_to_boundary(mut message: String, limit: usize) -> String {
    if message.len() > limit {
        let mut end = limit;
        while end > 0 && !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_merge_keeps_absent_fields() {
        let mut progress = ReplicationProgress {
            local_update_seq: Some(4),
            remote_update_seq: Some(7),
            push_last_seq: Some(4),
            pull_last_seq: None,
        };
        progress.apply(&ReplicationProgress {
            remote_update_seq: Some(8),
            pull_last_seq: Some(8),
            ..Default::default()
        });

        assert_eq!(progress.local_update_seq, Some(4));
        assert_eq!(progress.remote_update_seq, Some(8));
        assert_eq!(progress.push_last_seq, Some(4));
        assert_eq!(progress.pull_last_seq, Some(8));
    }

    #[test]
    fn status_and_error_updates() {
        let state = SyncStateStore::default();
        state.update_server_status("a", SyncStatus::Syncing);
        state.set_server_last_error_message("a", "boom");

        let entry = state.server("a").unwrap();
        assert_eq!(entry.status, SyncStatus::Syncing);
        assert_eq!(entry.last_error_message.as_deref(), Some("boom"));
        assert!(state.server("b").is_none());
    }

    #[test]
    fn bulk_status_covers_all_known_servers() {
        let state = SyncStateStore::default();
        state.ensure_server("a");
        state.ensure_server("b");
        state.update_server_status("b", SyncStatus::Online);

        state.update_all_server_status(SyncStatus::Offline);
        assert_eq!(state.server("a").unwrap().status, SyncStatus::Offline);
        assert_eq!(state.server("b").unwrap().status, SyncStatus::Offline);
    }

    #[test]
    fn retain_drops_deleted_servers() {
        let state = SyncStateStore::default();
        state.ensure_server("a");
        state.ensure_server("b");

        let keep = vec!["a".to_string()];
        state.retain_servers(&keep);
        assert!(state.server("a").is_some());
        assert!(state.server("b").is_none());
    }

    #[test]
    fn error_messages_are_bounded() {
        let state = SyncStateStore::new(10);
        state.set_server_last_error_message("a", "x".repeat(100));
        assert_eq!(state.server("a").unwrap().last_error_message.unwrap().len(), 10);

        // Multi-byte characters are not split.
        state.set_server_last_error_message("a", "ééééééé");
        let message = state.server("a").unwrap().last_error_message.unwrap();
        assert!(message.len() <= 10);
        assert!(message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn revision_bumps_on_mutation() {
        let state = SyncStateStore::default();
        let rx = state.subscribe();
        let before = *rx.borrow();
        state.update_server_status("a", SyncStatus::Initializing);
        state.reset_sync_progress("a");
        assert!(*rx.borrow() > before);
    }
}

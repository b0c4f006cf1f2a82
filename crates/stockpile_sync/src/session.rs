//! Replication session driver.
//!
//! One driver consumes one session's event stream in emission order,
//! derives progress updates for the shared state, and forwards distilled
//! notices to the orchestrator that owns the session.

use crate::seq::seq_value;
use crate::state::{ReplicationProgress, SyncStateStore};
use crate::status::SyncStatus;
use std::sync::Arc;
use stockpile_store::{CompleteInfo, Direction, SessionEvent, SessionHandle, StoreHandle};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a session reports back to its orchestrator.
#[derive(Debug)]
pub(crate) enum SessionNotice {
    /// A change batch was applied; carries the merged-in progress fields.
    Progress(ReplicationProgress),
    /// The session finished.
    Completed {
        /// Per-direction completion report.
        info: CompleteInfo,
        /// Final progress fields derived from the completion payload.
        progress: ReplicationProgress,
    },
    /// The session failed; status has already been recorded.
    Failed,
}

/// Drives one replication session.
pub(crate) struct SessionDriver {
    pub server_id: String,
    pub local: Arc<dyn StoreHandle>,
    pub remote: Arc<dyn StoreHandle>,
    pub state: Arc<SyncStateStore>,
    pub notices: mpsc::Sender<SessionNotice>,
    /// The owning orchestrator's cancellation flag. Once set, remaining
    /// events are discarded without side effects.
    pub cancelled: watch::Receiver<bool>,
}

impl SessionDriver {
    /// Spawns the driver task over a session's event stream.
    pub(crate) fn spawn(self, session: SessionHandle) -> JoinHandle<()> {
        tokio::spawn(self.run(session))
    }

    async fn run(self, mut session: SessionHandle) {
        while let Some(event) = session.next_event().await {
            if *self.cancelled.borrow() {
                debug!("discarding event from cancelled session");
                break;
            }
            match event {
                SessionEvent::Change { direction, last_seq, docs_written } => {
                    self.on_change(direction, &last_seq, docs_written).await;
                }
                SessionEvent::Complete(info) => {
                    self.on_complete(info).await;
                }
                SessionEvent::Paused { reason } => {
                    debug!(reason = reason.as_deref(), "replication paused");
                }
                SessionEvent::Active => {
                    debug!("replication active");
                }
                SessionEvent::Denied { message } => {
                    // Per-document authorization failure, not a connection
                    // failure; the server status is left untouched.
                    error!(%message, "document denied by remote");
                }
                SessionEvent::Error(err) => {
                    let message = format!("Error occurred while syncing: {err}");
                    error!(error = %err, "replication error");
                    self.state.update_server_status(&self.server_id, SyncStatus::Error);
                    self.state.set_server_last_error_message(&self.server_id, message);
                    let _ = self.notices.send(SessionNotice::Failed).await;
                }
            }
        }
    }

    async fn on_change(
        &self,
        direction: Direction,
        last_seq: &serde_json::Value,
        docs_written: usize,
    ) {
        let checkpoint = seq_value(last_seq);
        let (local_seq, remote_seq) = self.fetch_update_seqs().await;

        // Only the side matching the batch direction goes into the update;
        // the opposite side's metadata may be mid-flight and stale.
        let update = match direction {
            Direction::Push => ReplicationProgress {
                local_update_seq: local_seq,
                push_last_seq: checkpoint,
                ..Default::default()
            },
            Direction::Pull => ReplicationProgress {
                remote_update_seq: remote_seq,
                pull_last_seq: checkpoint,
                ..Default::default()
            },
        };

        self.state.update_sync_progress(&self.server_id, &update);
        info!(
            %direction,
            docs_written,
            checkpoint = ?checkpoint,
            local_update_seq = ?local_seq,
            remote_update_seq = ?remote_seq,
            "change applied"
        );
        let _ = self.notices.send(SessionNotice::Progress(update)).await;
    }

    async fn on_complete(&self, info: CompleteInfo) {
        let (local_seq, remote_seq) = self.fetch_update_seqs().await;
        let progress = ReplicationProgress {
            local_update_seq: local_seq,
            remote_update_seq: remote_seq,
            push_last_seq: seq_value(&info.push.last_seq),
            pull_last_seq: seq_value(&info.pull.last_seq),
        };

        self.state.update_sync_progress(&self.server_id, &progress);
        info!(
            push_ok = info.push.ok,
            pull_ok = info.pull.ok,
            progress = ?progress,
            "replication complete"
        );
        let _ = self.notices.send(SessionNotice::Completed { info, progress }).await;
    }

    /// Best-effort metadata fetch on both stores. A failed lookup degrades
    /// to an absent field rather than aborting progress reporting.
    async fn fetch_update_seqs(&self) -> (Option<u64>, Option<u64>) {
        let local = match self.local.info().await {
            Ok(store_info) => seq_value(&store_info.update_seq),
            Err(err) => {
                warn!(error = %err, "local store metadata unavailable");
                None
            }
        };
        let remote = match self.remote.info().await {
            Ok(store_info) => seq_value(&store_info.update_seq),
            Err(err) => {
                warn!(error = %err, "remote store metadata unavailable");
                None
            }
        };
        (local, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stockpile_store::{MemoryStore, ReplicationOptions};

    struct Fixture {
        state: Arc<SyncStateStore>,
        notices: mpsc::Receiver<SessionNotice>,
        driver: JoinHandle<()>,
        _cancel: watch::Sender<bool>,
    }

    fn start(local: MemoryStore, remote: MemoryStore, options: ReplicationOptions) -> Fixture {
        let state = Arc::new(SyncStateStore::default());
        let (tx, rx) = mpsc::channel(32);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let session = local.replicate(Arc::new(remote.clone()), options);
        let driver = SessionDriver {
            server_id: "s1".into(),
            local: Arc::new(local),
            remote: Arc::new(remote),
            state: Arc::clone(&state),
            notices: tx,
            cancelled: cancel_rx,
        }
        .spawn(session);
        Fixture { state, notices: rx, driver, _cancel: cancel_tx }
    }

    #[tokio::test]
    async fn one_shot_publishes_direction_scoped_progress() {
        let local = MemoryStore::new("local");
        let remote = MemoryStore::new("remote");
        local.put("item:1", json!({"name": "Tripod"}));
        local.put("item:2", json!({"name": "Charger"}));

        let mut fixture = start(local, remote, ReplicationOptions::one_shot(20));

        let first = fixture.notices.recv().await.unwrap();
        match first {
            SessionNotice::Progress(update) => {
                // The push batch reports the local seq and push checkpoint
                // only.
                assert_eq!(update.push_last_seq, Some(2));
                assert_eq!(update.local_update_seq, Some(2));
                assert_eq!(update.pull_last_seq, None);
            }
            other => panic!("expected a progress notice, got {other:?}"),
        }

        let completed = loop {
            match fixture.notices.recv().await.unwrap() {
                SessionNotice::Completed { info, progress } => break (info, progress),
                SessionNotice::Progress(_) => continue,
                SessionNotice::Failed => panic!("unexpected failure"),
            }
        };
        assert!(completed.0.is_clean());
        assert_eq!(completed.1.push_last_seq, Some(2));
        assert_eq!(completed.1.pull_last_seq, Some(0));
        assert_eq!(completed.1.local_update_seq, Some(2));
        assert_eq!(completed.1.remote_update_seq, Some(2));

        let entry = fixture.state.server("s1").unwrap();
        assert_eq!(entry.progress.push_last_seq, Some(2));
        fixture.driver.await.unwrap();
    }

    #[tokio::test]
    async fn metadata_failure_degrades_progress() {
        let local = MemoryStore::new("local");
        let remote = MemoryStore::new("remote");
        local.put("item:1", json!({}));
        remote.set_info_fails(true);

        let mut fixture = start(local, remote, ReplicationOptions::one_shot(20));

        let completed = loop {
            match fixture.notices.recv().await.unwrap() {
                SessionNotice::Completed { progress, .. } => break progress,
                SessionNotice::Progress(_) => continue,
                SessionNotice::Failed => panic!("unexpected failure"),
            }
        };
        // The remote field is omitted, everything else is intact.
        assert_eq!(completed.remote_update_seq, None);
        assert_eq!(completed.local_update_seq, Some(1));
        assert_eq!(completed.push_last_seq, Some(1));
        fixture.driver.await.unwrap();
    }

    #[tokio::test]
    async fn replication_error_sets_error_status() {
        let local = MemoryStore::new("local");
        let remote = MemoryStore::new("remote");
        remote.poison_replication("connection reset");

        let mut fixture = start(local, remote, ReplicationOptions::live(20));

        match fixture.notices.recv().await.unwrap() {
            SessionNotice::Failed => {}
            other => panic!("expected a failure notice, got {other:?}"),
        }
        let entry = fixture.state.server("s1").unwrap();
        assert_eq!(entry.status, SyncStatus::Error);
        assert!(entry
            .last_error_message
            .unwrap()
            .starts_with("Error occurred while syncing"));
        fixture.driver.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_driver_discards_events() {
        let local = MemoryStore::new("local");
        let remote = MemoryStore::new("remote");
        local.put("item:1", json!({}));

        let state = Arc::new(SyncStateStore::default());
        let (tx, mut rx) = mpsc::channel(32);
        let (cancel_tx, cancel_rx) = watch::channel(true); // cancelled up front
        let session = local.replicate(Arc::new(remote.clone()), ReplicationOptions::one_shot(20));
        let driver = SessionDriver {
            server_id: "s1".into(),
            local: Arc::new(local.clone()),
            remote: Arc::new(remote.clone()),
            state: Arc::clone(&state),
            notices: tx,
            cancelled: cancel_rx,
        }
        .spawn(session);

        driver.await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(state.server("s1").is_none());
        drop(cancel_tx);
    }
}

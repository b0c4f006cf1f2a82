//! Per-server sync orchestration.
//!
//! One orchestrator drives one server through connect → startup sync →
//! live sync, deriving the server's status and progress from session
//! notices. It owns every session handle it creates and is the only writer
//! of its server's state while it runs.

use crate::config::{ServerConfig, SyncOptions};
use crate::connector;
use crate::error::{SyncError, SyncResult};
use crate::session::{SessionDriver, SessionNotice};
use crate::state::{ReplicationProgress, SyncStateStore};
use crate::status::SyncStatus;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use stockpile_store::{
    CompleteInfo, ReplicationOptions, SessionCanceller, StoreClient, StoreHandle,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Shared cancellation state of one orchestration.
///
/// The flag is the single source of truth: it is checked before every
/// state transition, and cancelling forwards to whichever replication
/// sessions are registered at that moment.
#[derive(Debug)]
struct CancelShared {
    flag: watch::Sender<bool>,
    sessions: Mutex<Vec<SessionCanceller>>,
}

impl CancelShared {
    fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag, sessions: Mutex::new(Vec::new()) }
    }

    /// Sets the flag; only the first call has any effect.
    fn cancel(&self) {
        let first = self.flag.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
        if first {
            for session in self.sessions.lock().drain(..) {
                session.cancel();
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Registers a session to receive cancellation. A session registered
    /// after the fact is cancelled immediately.
    fn register(&self, session: SessionCanceller) {
        if self.is_cancelled() {
            session.cancel();
            return;
        }
        self.sessions.lock().push(session);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }
}

/// Cancellation handle of a running orchestrator.
#[derive(Debug)]
pub struct OrchestratorHandle {
    shared: Arc<CancelShared>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Requests cancellation. Idempotent: repeated calls have no further
    /// effect.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Waits for the orchestration task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }

    /// Cancels and waits for the task to finish.
    pub async fn stop(self) {
        self.cancel();
        self.join().await;
    }
}

/// Spawns an orchestrator for one enabled server.
///
/// The returned handle must be cancelled (or stopped) before the server is
/// handed to another orchestrator; the task never restarts itself.
pub fn spawn_orchestrator(
    client: Arc<dyn StoreClient>,
    local: Arc<dyn StoreHandle>,
    state: Arc<SyncStateStore>,
    server_id: impl Into<String>,
    config: ServerConfig,
    options: SyncOptions,
) -> OrchestratorHandle {
    let server_id = server_id.into();
    let shared = Arc::new(CancelShared::new());
    let run_id = Uuid::new_v4();
    let span = info_span!("sync", server = %server_id, run = %run_id);

    let orchestrator = Orchestrator {
        server_id: server_id.clone(),
        config,
        options,
        client,
        local,
        state: Arc::clone(&state),
        shared: Arc::clone(&shared),
        cancel_rx: shared.subscribe(),
    };

    let task = tokio::spawn(
        async move {
            match orchestrator.run().await {
                Ok(()) => {}
                Err(SyncError::Cancelled) => debug!("orchestration cancelled"),
                Err(err) => {
                    let message = format!("Unexpected error on starting synchronization: {err}");
                    error!(error = %err, "orchestration failed");
                    state.update_server_status(&server_id, SyncStatus::Error);
                    state.set_server_last_error_message(&server_id, message);
                }
            }
        }
        .instrument(span),
    );

    OrchestratorHandle { shared, task }
}

/// A session being consumed by this orchestrator.
struct RunningSession {
    notices: mpsc::Receiver<SessionNotice>,
    source: SessionCanceller,
}

impl RunningSession {
    fn cancel(&self) {
        self.source.cancel();
    }
}

enum StartupOutcome {
    Completed(CompleteInfo),
    Failed,
    Vanished,
}

/// Baselines captured when the startup sync completes successfully.
#[derive(Debug, Default, Clone, Copy)]
struct Baselines {
    startup_ok: bool,
    push: Option<u64>,
    pull: Option<u64>,
}

struct Orchestrator {
    server_id: String,
    config: ServerConfig,
    options: SyncOptions,
    client: Arc<dyn StoreClient>,
    local: Arc<dyn StoreHandle>,
    state: Arc<SyncStateStore>,
    shared: Arc<CancelShared>,
    cancel_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    async fn run(mut self) -> SyncResult<()> {
        // A fresh orchestration starts its bookkeeping from scratch.
        self.state.reset_sync_progress(&self.server_id);

        let Some(remote) = connector::connect_server(
            self.client.as_ref(),
            &self.server_id,
            &self.config,
            &self.state,
        )
        .await
        else {
            info!("cannot reach remote store, skipping");
            return Ok(());
        };
        self.ensure_live()?;

        self.state.update_server_status(&self.server_id, SyncStatus::Syncing);
        let mut tracker = ReplicationProgress::default();
        let mut startup =
            self.start_session(&remote, ReplicationOptions::one_shot(self.options.batch_size));

        let outcome = loop {
            // Resolve the select into a plain value first; the handlers
            // below are then free to borrow `self`.
            let step = tokio::select! {
                _ = self.cancel_rx.wait_for(|cancelled| *cancelled) => None,
                notice = startup.notices.recv() => Some(notice),
            };
            match step {
                None => return Err(SyncError::Cancelled),
                Some(Some(SessionNotice::Progress(update))) => tracker.apply(&update),
                Some(Some(SessionNotice::Completed { info, progress })) => {
                    tracker.apply(&progress);
                    break StartupOutcome::Completed(info);
                }
                Some(Some(SessionNotice::Failed)) => break StartupOutcome::Failed,
                Some(None) => break StartupOutcome::Vanished,
            }
        };

        let info = match outcome {
            StartupOutcome::Completed(info) => info,
            // Status was already recorded by the session driver; the next
            // reconciliation pass retries from scratch.
            StartupOutcome::Failed => return Ok(()),
            StartupOutcome::Vanished => {
                // A cancelled driver closes the channel without completing;
                // that is teardown, not a failure.
                self.ensure_live()?;
                return Err(SyncError::Replication(
                    "startup session ended without completing".into(),
                ));
            }
        };

        // Cancelled while the completion notice was in flight: stop before
        // touching state.
        self.ensure_live()?;

        let mut baselines = Baselines::default();
        if info.is_clean() {
            let now = Utc::now();
            self.state.update_last_synced_at(&self.server_id, now);
            baselines = Baselines {
                startup_ok: true,
                push: tracker.push_last_seq,
                pull: tracker.pull_last_seq,
            };
            info!(last_synced_at = %now, "start-up sync completed");
        } else {
            warn!(
                push_ok = info.push.ok,
                pull_ok = info.pull.ok,
                push_errors = info.push.errors.len(),
                pull_errors = info.pull.errors.len(),
                "start-up sync is not complete"
            );
        }

        // Startup failures do not block live sync; they only withhold the
        // last-synced timestamp.
        self.state.update_server_status(&self.server_id, SyncStatus::Online);

        // Hand over: the previous session's handle is cancelled before the
        // next session exists, so at most one is ever live.
        startup.cancel();
        let mut live =
            self.start_session(&remote, ReplicationOptions::live(self.options.batch_size));

        loop {
            let step = tokio::select! {
                _ = self.cancel_rx.wait_for(|cancelled| *cancelled) => None,
                notice = live.notices.recv() => Some(notice),
            };
            match step {
                None => return Err(SyncError::Cancelled),
                Some(Some(SessionNotice::Progress(update))) => {
                    tracker.apply(&update);
                    self.evaluate_live_progress(&tracker, &baselines);
                }
                Some(Some(SessionNotice::Completed { .. })) => {
                    debug!("live session completed");
                    break;
                }
                Some(Some(SessionNotice::Failed)) | Some(None) => break,
            }
        }

        Ok(())
    }

    /// Recomputes push/pull completeness after a live change batch.
    fn evaluate_live_progress(&self, tracker: &ReplicationProgress, baselines: &Baselines) {
        let push_done = direction_complete(
            tracker.local_update_seq,
            tracker.push_last_seq,
            baselines.startup_ok,
            baselines.push,
        );
        let pull_done = direction_complete(
            tracker.remote_update_seq,
            tracker.pull_last_seq,
            baselines.startup_ok,
            baselines.pull,
        );

        if push_done && pull_done {
            self.state.update_server_status(&self.server_id, SyncStatus::Online);
            let now = Utc::now();
            self.state.update_last_synced_at(&self.server_id, now);
            info!(last_synced_at = %now, "sync caught up");
        } else {
            self.state.update_server_status(&self.server_id, SyncStatus::Syncing);
        }
    }

    fn start_session(
        &self,
        remote: &Arc<dyn StoreHandle>,
        options: ReplicationOptions,
    ) -> RunningSession {
        let session = self.local.replicate(Arc::clone(remote), options);
        let source = session.canceller();
        self.shared.register(source.clone());

        let (notices_tx, notices_rx) = mpsc::channel(32);
        let driver = SessionDriver {
            server_id: self.server_id.clone(),
            local: Arc::clone(&self.local),
            remote: Arc::clone(remote),
            state: Arc::clone(&self.state),
            notices: notices_tx,
            cancelled: self.shared.subscribe(),
        };
        // The driver runs detached; it ends when the session's event
        // stream closes.
        let _ = driver.spawn(session);

        RunningSession { notices: notices_rx, source }
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.shared.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One direction has caught up when its store's update sequence equals the
/// checkpoint it last reported. A direction that was empty at startup
/// (baseline 0) never fires a change event, so a still-zero checkpoint
/// counts as caught up after a clean startup.
fn direction_complete(
    update_seq: Option<u64>,
    last_seq: Option<u64>,
    startup_ok: bool,
    baseline: Option<u64>,
) -> bool {
    if startup_ok && baseline == Some(0) && last_seq == Some(0) {
        return true;
    }
    matches!((update_seq, last_seq), (Some(update), Some(last)) if update == last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completeness_requires_both_values() {
        assert!(direction_complete(Some(4), Some(4), false, None));
        assert!(!direction_complete(Some(4), Some(3), false, None));
        assert!(!direction_complete(None, Some(4), false, None));
        assert!(!direction_complete(Some(4), None, false, None));
        assert!(!direction_complete(None, None, false, None));
    }

    #[test]
    fn zero_baseline_counts_as_complete_after_clean_startup() {
        // No change event ever fires for a side that never had data.
        assert!(direction_complete(None, Some(0), true, Some(0)));
        assert!(!direction_complete(None, Some(0), false, Some(0)));
        // A non-zero checkpoint means data appeared; the equality rule
        // takes over.
        assert!(!direction_complete(None, Some(3), true, Some(0)));
    }

    #[test]
    fn cancel_shared_is_idempotent() {
        let shared = CancelShared::new();
        let (session, watcher) = SessionCanceller::new();
        shared.register(session);

        assert!(!shared.is_cancelled());
        shared.cancel();
        assert!(shared.is_cancelled());
        assert!(*watcher.borrow());

        // A second cancel is a no-op; the session list is already drained.
        shared.cancel();
        assert!(shared.sessions.lock().is_empty());
    }

    #[test]
    fn late_session_registration_cancels_immediately() {
        let shared = CancelShared::new();
        shared.cancel();

        let (session, watcher) = SessionCanceller::new();
        shared.register(session);
        assert!(*watcher.borrow());
        assert!(shared.sessions.lock().is_empty());
    }
}

//! Bidirectional replication between memory stores.
//!
//! One replicator task serves one session. Each direction keeps a
//! checkpoint cursor; a sweep processes source documents past the cursor
//! in batches, writing the revisions the target is missing. A batch that
//! processed documents emits a `Change` event whether or not anything was
//! written — already-present revisions advance the checkpoint with
//! `docs_written: 0`, which is how downstream progress tracking learns a
//! direction has caught up. Per-document rejections emit `Denied` and are
//! collected into the direction's branch result.

use crate::client::{ReplicationOptions, SessionCanceller, SessionHandle, StoreHandle};
use crate::error::StoreError;
use crate::events::{BranchResult, CompleteInfo, Direction, SessionEvent};
use crate::memory::{DocRecord, MemoryStore};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

pub(crate) fn spawn(
    local: MemoryStore,
    remote: Arc<dyn StoreHandle>,
    options: ReplicationOptions,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(64);
    let (canceller, cancel_rx) = SessionCanceller::new();

    match remote.as_any().downcast_ref::<MemoryStore>().cloned() {
        Some(remote) => {
            tokio::spawn(run(local, remote, options, tx, cancel_rx));
        }
        None => {
            tokio::spawn(async move {
                let _ = tx
                    .send(SessionEvent::Error(StoreError::Server(
                        "replication peer is not a memory store".into(),
                    )))
                    .await;
            });
        }
    }

    SessionHandle::new(rx, canceller)
}

/// State of one replication direction.
struct DirectionState {
    direction: Direction,
    /// Highest source sequence processed so far.
    cursor: u64,
    /// Per-document rejections accumulated over the session.
    errors: Vec<String>,
}

impl DirectionState {
    fn new(direction: Direction) -> Self {
        Self { direction, cursor: 0, errors: Vec::new() }
    }

    fn branch_result(&self, src: &MemoryStore) -> BranchResult {
        BranchResult {
            ok: self.errors.is_empty(),
            errors: self.errors.clone(),
            last_seq: src.seq_value(self.cursor),
        }
    }
}

/// Processes `docs` past the direction's cursor, one batch at a time,
/// applying each revision the target is missing.
async fn sweep(
    docs: &[(String, DocRecord)],
    state: &mut DirectionState,
    src: &MemoryStore,
    dst: &MemoryStore,
    batch_size: usize,
    tx: &mpsc::Sender<SessionEvent>,
    cancel: &watch::Receiver<bool>,
) {
    let pending: Vec<_> = docs.iter().filter(|(_, rec)| rec.seq > state.cursor).collect();

    for batch in pending.chunks(batch_size.max(1)) {
        if *cancel.borrow() {
            return;
        }
        let mut written = 0usize;
        for (id, rec) in batch {
            match dst.apply_replicated(id, rec) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(message) => {
                    let _ = tx.send(SessionEvent::Denied { message: message.clone() }).await;
                    state.errors.push(message);
                }
            }
            state.cursor = state.cursor.max(rec.seq);
        }
        let _ = tx
            .send(SessionEvent::Change {
                direction: state.direction,
                last_seq: src.seq_value(state.cursor),
                docs_written: written,
            })
            .await;
    }
}

async fn run(
    local: MemoryStore,
    remote: MemoryStore,
    options: ReplicationOptions,
    tx: mpsc::Sender<SessionEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    // Subscribe before the initial pass so no commit is missed in the gap
    // between catch-up and tailing.
    let mut local_feed = local.subscribe_commits();
    let mut remote_feed = remote.subscribe_commits();
    let mut local_poison = local.poison_watch();
    let mut remote_poison = remote.poison_watch();

    // Sweeps take their own receiver; `cancel` stays exclusive to the
    // select loop below.
    let sweep_cancel = cancel.clone();

    let poisoned = |rx: &watch::Receiver<Option<String>>| rx.borrow().clone();
    if let Some(message) = poisoned(&local_poison).or_else(|| poisoned(&remote_poison)) {
        let _ = tx.send(SessionEvent::Error(StoreError::Network(message))).await;
        return;
    }

    let _ = tx.send(SessionEvent::Active).await;

    let mut push = DirectionState::new(Direction::Push);
    let mut pull = DirectionState::new(Direction::Pull);

    // Snapshot both sides before applying either direction, so one
    // direction's writes do not appear as changes to the other.
    let local_docs = local.snapshot();
    let remote_docs = remote.snapshot();
    sweep(&local_docs, &mut push, &local, &remote, options.batch_size, &tx, &sweep_cancel).await;
    sweep(&remote_docs, &mut pull, &remote, &local, options.batch_size, &tx, &sweep_cancel).await;

    if !options.continuous {
        let _ = tx
            .send(SessionEvent::Complete(CompleteInfo {
                push: push.branch_result(&local),
                pull: pull.branch_result(&remote),
            }))
            .await;
        return;
    }

    // Caught up; stream ongoing changes until cancelled or poisoned.
    let _ = tx.send(SessionEvent::Paused { reason: None }).await;

    // Resolve one terminating condition from the select loop, then act on
    // it after the loop so no `!Send` watch guard is held across an await.
    enum Outcome {
        Cancelled,
        Poisoned(String),
    }

    let outcome = loop {
        tokio::select! {
            // The `wait_for` guards (`watch::Ref`) are `!Send`; resolve them
            // to owned values inside an async block so no guard crosses the
            // `select!` boundary into the awaiting branches below.
            cancelled_ok = async { cancel.wait_for(|c| *c).await.is_ok() } => {
                if cancelled_ok {
                    debug!(local = local.name(), remote = remote.name(), "live replication cancelled");
                }
                // A dropped canceller tears the session down the same way.
                break Outcome::Cancelled;
            }
            message = async {
                match local_poison.wait_for(|p| p.is_some()).await {
                    Ok(p) => (*p).clone().unwrap_or_default(),
                    Err(_) => "store closed".into(),
                }
            } => {
                break Outcome::Poisoned(message);
            }
            message = async {
                match remote_poison.wait_for(|p| p.is_some()).await {
                    Ok(p) => (*p).clone().unwrap_or_default(),
                    Err(_) => "store closed".into(),
                }
            } => {
                break Outcome::Poisoned(message);
            }
            commit = local_feed.recv() => {
                if !commit_observed(commit) {
                    continue;
                }
                let docs = local.snapshot();
                sweep(&docs, &mut push, &local, &remote, options.batch_size, &tx, &sweep_cancel)
                    .await;
            }
            commit = remote_feed.recv() => {
                if !commit_observed(commit) {
                    continue;
                }
                let docs = remote.snapshot();
                sweep(&docs, &mut pull, &remote, &local, options.batch_size, &tx, &sweep_cancel)
                    .await;
            }
        }
    };

    match outcome {
        Outcome::Cancelled => {
            let _ = tx
                .send(SessionEvent::Complete(CompleteInfo {
                    push: push.branch_result(&local),
                    pull: pull.branch_result(&remote),
                }))
                .await;
        }
        Outcome::Poisoned(message) => {
            let _ = tx.send(SessionEvent::Error(StoreError::Network(message))).await;
        }
    }
}

/// A lagged feed still warrants a sweep (sweeps re-scan from the cursor);
/// only a closed feed is a no-op.
fn commit_observed(commit: Result<u64, broadcast::error::RecvError>) -> bool {
    match commit {
        Ok(_) => true,
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            debug!(skipped, "commit feed lagged, rescanning");
            true
        }
        Err(broadcast::error::RecvError::Closed) => false,
    }
}

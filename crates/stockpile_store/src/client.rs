//! Store client traits and replication session handles.

use crate::error::StoreResult;
use crate::events::SessionEvent;
use crate::types::{Credentials, StoreInfo};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Parameters for one replication run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationOptions {
    /// Keep the session open and stream ongoing changes.
    pub continuous: bool,
    /// Maximum number of documents applied per batch.
    pub batch_size: usize,
    /// Let the replicator retry transient failures internally before
    /// surfacing a terminal error event.
    pub retry: bool,
}

impl ReplicationOptions {
    /// A one-shot run that stops once both sides have caught up.
    pub fn one_shot(batch_size: usize) -> Self {
        Self {
            continuous: false,
            batch_size,
            retry: false,
        }
    }

    /// A continuous run with internal retry enabled.
    pub fn live(batch_size: usize) -> Self {
        Self {
            continuous: true,
            batch_size,
            retry: true,
        }
    }
}

/// A cloneable cancellation control for one replication session.
///
/// Cancellation is cooperative and idempotent: the first call stops event
/// emission at the source and makes the replicator emit a final
/// [`SessionEvent::Complete`]; later calls are no-ops.
#[derive(Debug, Clone)]
pub struct SessionCanceller {
    signal: Arc<watch::Sender<bool>>,
}

impl SessionCanceller {
    /// Creates a canceller and the receiver a replicator watches.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { signal: Arc::new(tx) }, rx)
    }

    /// Requests cancellation of the session.
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }
}

/// A running replication session.
///
/// Owns the receiving half of the event stream; dropping the handle without
/// cancelling leaves the replication running headless, so owners cancel
/// before discarding.
#[derive(Debug)]
pub struct SessionHandle {
    events: mpsc::Receiver<SessionEvent>,
    canceller: SessionCanceller,
}

impl SessionHandle {
    /// Wraps an event stream and its cancellation control.
    pub fn new(events: mpsc::Receiver<SessionEvent>, canceller: SessionCanceller) -> Self {
        Self { events, canceller }
    }

    /// Receives the next session event, or `None` once the session is over.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Returns a cloneable cancellation control for this session.
    pub fn canceller(&self) -> SessionCanceller {
        self.canceller.clone()
    }

    /// Cancels the session.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }
}

/// An open handle to one document store.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Fetches store metadata (document count and update sequence).
    async fn info(&self) -> StoreResult<StoreInfo>;

    /// Starts a bidirectional replication between this store (local side)
    /// and `remote`, returning a cancellable session handle.
    fn replicate(&self, remote: Arc<dyn StoreHandle>, options: ReplicationOptions) -> SessionHandle;

    /// Upcast used by replicator implementations to recognize peers of the
    /// same backend.
    fn as_any(&self) -> &dyn Any;
}

/// A factory for authenticated store connections.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Opens an authenticated connection to the store at `uri` and verifies
    /// it is reachable.
    async fn connect(
        &self,
        uri: &str,
        credentials: &Credentials,
    ) -> StoreResult<Arc<dyn StoreHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_constructors() {
        let one_shot = ReplicationOptions::one_shot(20);
        assert!(!one_shot.continuous);
        assert!(!one_shot.retry);
        assert_eq!(one_shot.batch_size, 20);

        let live = ReplicationOptions::live(20);
        assert!(live.continuous);
        assert!(live.retry);
    }

    #[test]
    fn canceller_is_idempotent() {
        let (canceller, rx) = SessionCanceller::new();
        assert!(!canceller.is_cancelled());
        canceller.cancel();
        canceller.cancel();
        assert!(canceller.is_cancelled());
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn cancellation_wakes_watcher() {
        let (canceller, mut rx) = SessionCanceller::new();
        let waiter = tokio::spawn(async move {
            rx.wait_for(|cancelled| *cancelled).await.map(|_| ()).ok();
        });
        canceller.cancel();
        waiter.await.unwrap();
    }
}

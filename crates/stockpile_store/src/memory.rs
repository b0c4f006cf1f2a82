//! In-memory document stores and a loopback store network.
//!
//! `MemoryStore` is a real (if small) document store: documents carry
//! compound revisions, every write bumps a numeric update sequence, and a
//! broadcast commit feed drives continuous replication. `MemoryNetwork`
//! resolves `memory://<host>` URIs to registered stores and supports
//! per-host fault injection, so the full connect/replicate surface can be
//! exercised without a server.

use crate::client::{ReplicationOptions, SessionHandle, StoreClient, StoreHandle};
use crate::error::{StoreError, StoreResult};
use crate::replicator;
use crate::types::{Credentials, StoreInfo};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// One stored document revision.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DocRecord {
    pub(crate) rev: String,
    pub(crate) body: Value,
    pub(crate) seq: u64,
    pub(crate) deleted: bool,
}

/// Extracts the generation number from a `"<gen>-<hash>"` revision.
pub(crate) fn rev_gen(rev: &str) -> u64 {
    rev.split('-')
        .next()
        .and_then(|lead| lead.parse().ok())
        .unwrap_or(0)
}

#[derive(Debug)]
struct StoreInner {
    name: String,
    docs: RwLock<BTreeMap<String, DocRecord>>,
    update_seq: AtomicU64,
    commits: broadcast::Sender<u64>,
    info_fails: AtomicBool,
    read_only: AtomicBool,
    poison: watch::Sender<Option<String>>,
}

/// A named in-memory document store.
///
/// Cloning is cheap and shares the underlying store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        let (commits, _) = broadcast::channel(256);
        let (poison, _) = watch::channel(None);
        Self {
            inner: Arc::new(StoreInner {
                name: name.into(),
                docs: RwLock::new(BTreeMap::new()),
                update_seq: AtomicU64::new(0),
                commits,
                info_fails: AtomicBool::new(false),
                read_only: AtomicBool::new(false),
                poison,
            }),
        }
    }

    /// Returns the store name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Writes a document, creating it or replacing the current revision.
    /// Returns the update sequence of the write.
    pub fn put(&self, id: impl Into<String>, body: Value) -> u64 {
        self.write(id.into(), body, false)
    }

    /// Deletes a document by writing a tombstone revision.
    /// Returns the update sequence of the write, or `None` if the document
    /// does not exist.
    pub fn remove(&self, id: &str) -> Option<u64> {
        if !self.inner.docs.read().contains_key(id) {
            return None;
        }
        Some(self.write(id.to_string(), Value::Null, true))
    }

    /// Reads a document body. Tombstones read as `None`.
    pub fn get(&self, id: &str) -> Option<Value> {
        let docs = self.inner.docs.read();
        docs.get(id)
            .filter(|doc| !doc.deleted)
            .map(|doc| doc.body.clone())
    }

    /// Number of live (non-deleted) documents.
    pub fn doc_count(&self) -> u64 {
        self.inner.docs.read().values().filter(|d| !d.deleted).count() as u64
    }

    /// Current update sequence as a plain number.
    pub fn update_seq(&self) -> u64 {
        self.inner.update_seq.load(Ordering::SeqCst)
    }

    /// Makes subsequent `info()` calls fail, for exercising best-effort
    /// metadata paths.
    pub fn set_info_fails(&self, fails: bool) {
        self.inner.info_fails.store(fails, Ordering::SeqCst);
    }

    /// Makes every live replication session involving this store fail with
    /// an unrecoverable error.
    pub fn poison_replication(&self, message: impl Into<String>) {
        self.inner.poison.send_replace(Some(message.into()));
    }

    /// Rejects replicated writes into this store. Local `put`/`remove`
    /// still work, so one direction of a sync can be made to fail.
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Renders an update sequence the way this backend reports it: `0` as a
    /// JSON number, anything else as a compound `"<seq>-<token>"` string.
    pub(crate) fn seq_value(&self, seq: u64) -> Value {
        if seq == 0 {
            return Value::from(0u64);
        }
        let mut hasher = DefaultHasher::new();
        (self.name(), seq).hash(&mut hasher);
        Value::from(format!("{seq}-{:06x}", hasher.finish() & 0xff_ffff))
    }

    pub(crate) fn subscribe_commits(&self) -> broadcast::Receiver<u64> {
        self.inner.commits.subscribe()
    }

    pub(crate) fn poison_watch(&self) -> watch::Receiver<Option<String>> {
        self.inner.poison.subscribe()
    }

    /// Documents in commit order, tombstones included.
    pub(crate) fn snapshot(&self) -> Vec<(String, DocRecord)> {
        let docs = self.inner.docs.read();
        let mut all: Vec<_> = docs.iter().map(|(id, d)| (id.clone(), d.clone())).collect();
        all.sort_by_key(|(_, d)| d.seq);
        all
    }

    /// Applies a replicated revision. `Ok(false)` means the store already
    /// has this revision (or a newer one): the replication checkpoint
    /// advances without a write. `Err` is a per-document rejection.
    pub(crate) fn apply_replicated(&self, id: &str, incoming: &DocRecord) -> Result<bool, String> {
        let seq = {
            let mut docs = self.inner.docs.write();
            if let Some(existing) = docs.get(id) {
                if existing.rev == incoming.rev || rev_gen(&existing.rev) >= rev_gen(&incoming.rev)
                {
                    return Ok(false);
                }
            }
            if self.inner.read_only.load(Ordering::SeqCst) {
                return Err(format!("{id}: store {} is read-only", self.name()));
            }
            let seq = self.inner.update_seq.fetch_add(1, Ordering::SeqCst) + 1;
            docs.insert(
                id.to_string(),
                DocRecord {
                    rev: incoming.rev.clone(),
                    body: incoming.body.clone(),
                    seq,
                    deleted: incoming.deleted,
                },
            );
            seq
        };
        let _ = self.inner.commits.send(seq);
        Ok(true)
    }

    fn write(&self, id: String, body: Value, deleted: bool) -> u64 {
        let seq = {
            let mut docs = self.inner.docs.write();
            let gen = docs.get(&id).map(|d| rev_gen(&d.rev)).unwrap_or(0) + 1;
            let seq = self.inner.update_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let mut hasher = DefaultHasher::new();
            (&id, gen, seq, &body.to_string()).hash(&mut hasher);
            let rev = format!("{gen}-{:08x}", hasher.finish() as u32);
            docs.insert(id, DocRecord { rev, body, seq, deleted });
            seq
        };
        let _ = self.inner.commits.send(seq);
        seq
    }
}

#[async_trait]
impl StoreHandle for MemoryStore {
    async fn info(&self) -> StoreResult<StoreInfo> {
        if self.inner.info_fails.load(Ordering::SeqCst) {
            return Err(StoreError::Network("store metadata unavailable".into()));
        }
        Ok(StoreInfo {
            doc_count: self.doc_count(),
            update_seq: self.seq_value(self.update_seq()),
        })
    }

    fn replicate(&self, remote: Arc<dyn StoreHandle>, options: ReplicationOptions) -> SessionHandle {
        replicator::spawn(self.clone(), remote, options)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connection fault injected for one registered host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFault {
    /// Connection attempts time out.
    Timeout,
    /// The host is unreachable.
    Unreachable,
    /// The host rejects any credentials.
    RejectAuth,
}

#[derive(Debug)]
struct HostEntry {
    store: MemoryStore,
    credentials: Credentials,
    fault: Option<ConnectFault>,
}

/// A registry of memory stores reachable by `memory://<host>` URIs.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    hosts: RwLock<HashMap<String, HostEntry>>,
    connects: AtomicU64,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a store under a host name with the credentials it accepts.
    pub fn register(&self, host: impl Into<String>, store: MemoryStore, credentials: Credentials) {
        self.hosts.write().insert(
            host.into(),
            HostEntry { store, credentials, fault: None },
        );
    }

    /// Sets or clears the connection fault for a host.
    pub fn set_fault(&self, host: &str, fault: Option<ConnectFault>) {
        if let Some(entry) = self.hosts.write().get_mut(host) {
            entry.fault = fault;
        }
    }

    /// Number of connection attempts seen so far.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreClient for MemoryNetwork {
    async fn connect(
        &self,
        uri: &str,
        credentials: &Credentials,
    ) -> StoreResult<Arc<dyn StoreHandle>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let host = uri
            .strip_prefix("memory://")
            .ok_or_else(|| StoreError::InvalidUri(uri.to_string()))?;

        let hosts = self.hosts.read();
        let entry = hosts.get(host).ok_or_else(|| StoreError::Unreachable {
            host: host.to_string(),
        })?;

        match entry.fault {
            Some(ConnectFault::Timeout) => return Err(StoreError::Timeout),
            Some(ConnectFault::Unreachable) => {
                return Err(StoreError::Unreachable { host: host.to_string() })
            }
            Some(ConnectFault::RejectAuth) => {
                return Err(StoreError::Unauthorized("name or password is incorrect".into()))
            }
            None => {}
        }

        if *credentials != entry.credentials {
            return Err(StoreError::Unauthorized("name or password is incorrect".into()));
        }

        Ok(Arc::new(entry.store.clone()))
    }
}

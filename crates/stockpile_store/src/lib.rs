//! # Stockpile Store
//!
//! Document-store client boundary for Stockpile sync.
//!
//! This crate provides:
//! - `StoreClient` / `StoreHandle` traits for authenticated store access
//! - A typed replication event stream (`SessionEvent`)
//! - Cancellable replication session handles
//! - A classified store error type
//! - An in-memory store network with a real bidirectional replicator
//!
//! ## Architecture
//!
//! The sync core never talks to a concrete store: it connects through a
//! [`StoreClient`], reads metadata through [`StoreHandle::info`], and
//! starts replications through [`StoreHandle::replicate`], consuming the
//! resulting [`SessionEvent`] stream. The in-memory implementation here
//! backs the test suites and any loopback deployment.
//!
//! ## Key invariants
//!
//! - Session events are delivered in emission order
//! - `Complete` is emitted at most once per session, after every `Change`
//! - Cancellation is cooperative and idempotent
//! - Error kinds are closed; callers never parse error messages

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod events;
mod memory;
mod replicator;
mod types;

pub use client::{
    ReplicationOptions, SessionCanceller, SessionHandle, StoreClient, StoreHandle,
};
pub use error::{StoreError, StoreResult};
pub use events::{BranchResult, CompleteInfo, Direction, SessionEvent};
pub use memory::{ConnectFault, MemoryNetwork, MemoryStore};
pub use types::{Credentials, StoreInfo};

//! # Stockpile Sync
//!
//! Multi-server replication manager for Stockpile.
//!
//! This crate provides:
//! - Checkpoint normalization (`seq_value`)
//! - A classified server connector (offline vs error failures)
//! - Replication session drivers over typed event streams
//! - A per-server orchestration state machine (connect → startup sync →
//!   live sync) with cooperative cancellation
//! - A top-level manager reconciling orchestrators against configuration
//!   and network inputs
//! - A shared per-server status/progress store for UIs
//!
//! ## Architecture
//!
//! The manager owns the full set of running orchestrators. Any input
//! change — servers edited, sync toggled, connectivity or connection type
//! changed — cancels everything and rebuilds from the new inputs, which
//! keeps exactly one writer per server identifier without locks.
//!
//! Each orchestrator connects once, runs a one-shot startup replication,
//! then holds a continuous live replication open, deriving the server's
//! coarse status (`Syncing`/`Online`/...) from the session's change and
//! completion events.
//!
//! ## Key invariants
//!
//! - At most one orchestrator, and one live session, per server at a time
//! - Status writes are last-write-wins by the current owner only
//! - Cancellation is idempotent and absorbs all later events
//! - No failure escapes the subsystem: everything terminates in a status
//!   update or a log entry

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connector;
mod error;
mod manager;
mod net;
mod orchestrator;
mod seq;
mod session;
mod state;
mod status;

pub use config::{ServerConfig, SyncInputs, SyncOptions};
pub use error::{SyncError, SyncResult};
pub use manager::SyncManager;
pub use net::NetworkState;
pub use orchestrator::{spawn_orchestrator, OrchestratorHandle};
pub use seq::seq_value;
pub use state::{ReplicationProgress, ServerEntry, SyncStateStore};
pub use status::SyncStatus;

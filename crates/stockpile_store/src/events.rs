//! Typed replication session events.
//!
//! A replication run reports progress as a stream of [`SessionEvent`]
//! values, delivered in emission order through a [`crate::SessionHandle`].

use crate::error::StoreError;
use serde_json::Value;
use std::fmt;

/// Direction of a replicated batch, relative to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local changes applied to the remote store.
    Push,
    /// Remote changes applied to the local store.
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => f.write_str("push"),
            Direction::Pull => f.write_str("pull"),
        }
    }
}

/// Outcome of one direction of a replication run.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchResult {
    /// Whether this direction finished without failing.
    pub ok: bool,
    /// Document-level errors encountered in this direction.
    pub errors: Vec<String>,
    /// Checkpoint reached in this direction.
    pub last_seq: Value,
}

impl BranchResult {
    /// A successful branch that reached the given checkpoint.
    pub fn ok(last_seq: impl Into<Value>) -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            last_seq: last_seq.into(),
        }
    }

    /// A failed branch with one error message.
    pub fn failed(last_seq: impl Into<Value>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            errors: vec![error.into()],
            last_seq: last_seq.into(),
        }
    }
}

/// Final report of a completed (or cancelled) replication run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteInfo {
    /// Push direction outcome.
    pub push: BranchResult,
    /// Pull direction outcome.
    pub pull: BranchResult,
}

impl CompleteInfo {
    /// Returns true when both directions finished cleanly.
    pub fn is_clean(&self) -> bool {
        self.push.ok && self.pull.ok && self.push.errors.is_empty() && self.pull.errors.is_empty()
    }
}

/// One event from a running replication session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A batch of documents was applied in one direction.
    Change {
        /// Direction of the applied batch.
        direction: Direction,
        /// Checkpoint reached by this batch.
        last_seq: Value,
        /// Number of documents written by this batch.
        docs_written: usize,
    },
    /// The run finished, either naturally (one-shot) or by cancellation.
    ///
    /// For a given session this is emitted at most once, after every
    /// `Change` of that session.
    Complete(CompleteInfo),
    /// The replicator is idle, waiting for new changes.
    Paused {
        /// Transient error that caused the pause, if any.
        reason: Option<String>,
    },
    /// The replicator resumed processing changes.
    Active,
    /// The remote rejected a document (per-document authorization).
    Denied {
        /// Rejection detail from the remote.
        message: String,
    },
    /// The run failed with an unrecoverable error. No further events follow.
    Error(StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_display() {
        assert_eq!(Direction::Push.to_string(), "push");
        assert_eq!(Direction::Pull.to_string(), "pull");
    }

    #[test]
    fn clean_completion() {
        let info = CompleteInfo {
            push: BranchResult::ok(4),
            pull: BranchResult::ok(0),
        };
        assert!(info.is_clean());
    }

    #[test]
    fn failed_branch_is_not_clean() {
        let info = CompleteInfo {
            push: BranchResult::ok(4),
            pull: BranchResult::failed(2, "conflict on item:3"),
        };
        assert!(!info.is_clean());
        assert_eq!(info.pull.errors.len(), 1);
    }

    #[test]
    fn ok_branch_with_errors_is_not_clean() {
        let mut push = BranchResult::ok(1);
        push.errors.push("write failed".into());
        let info = CompleteInfo {
            push,
            pull: BranchResult::ok(0),
        };
        assert!(!info.is_clean());
    }
}

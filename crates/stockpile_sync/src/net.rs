//! Network connectivity input.

use serde::{Deserialize, Serialize};

/// One observation from the platform's network-reachability monitor.
///
/// Delivered to the sync manager over a watch channel; any change —
/// including a connection-type change while connectivity stays up —
/// triggers a full reconciliation pass, because running sessions may be
/// bound to a stale network path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Whether the device has connectivity; `None` while unknown.
    pub is_connected: Option<bool>,
    /// Connection type reported by the platform (`wifi`, `cellular`, ...).
    pub kind: String,
    /// Whether the platform flags this connection as expensive (metered).
    pub is_expensive: Option<bool>,
}

impl NetworkState {
    /// A connected state over the given connection type.
    pub fn connected(kind: impl Into<String>) -> Self {
        Self {
            is_connected: Some(true),
            kind: kind.into(),
            is_expensive: None,
        }
    }

    /// A disconnected state.
    pub fn offline() -> Self {
        Self {
            is_connected: Some(false),
            kind: "none".into(),
            is_expensive: None,
        }
    }

    /// Marks the connection as expensive.
    pub fn with_expensive(mut self, expensive: bool) -> Self {
        self.is_expensive = Some(expensive);
        self
    }

    /// True only when connectivity is positively known to be up.
    pub fn is_online(&self) -> bool {
        self.is_connected == Some(true)
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            is_connected: None,
            kind: "unknown".into(),
            is_expensive: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_connectivity_is_not_online() {
        assert!(!NetworkState::default().is_online());
        assert!(!NetworkState::offline().is_online());
        assert!(NetworkState::connected("wifi").is_online());
    }

    #[test]
    fn kind_change_is_a_state_change() {
        let wifi = NetworkState::connected("wifi");
        let cellular = NetworkState::connected("cellular");
        assert_ne!(wifi, cellular);
    }
}

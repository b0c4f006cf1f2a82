//! Top-level sync manager.
//!
//! The manager reconciles running per-server orchestrators against the
//! desired state derived from its inputs: the server configuration, the
//! global sync toggle, local store readiness, and network connectivity.
//! Every input change triggers a full stop-and-restart pass; ownership of
//! a server identifier is only ever transferred through that pass.

use crate::config::{SyncInputs, SyncOptions};
use crate::net::NetworkState;
use crate::orchestrator::{spawn_orchestrator, OrchestratorHandle};
use crate::state::SyncStateStore;
use crate::status::SyncStatus;
use std::sync::Arc;
use stockpile_store::{StoreClient, StoreHandle};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Supervises one orchestrator per enabled server.
pub struct SyncManager {
    client: Arc<dyn StoreClient>,
    local: Option<Arc<dyn StoreHandle>>,
    state: Arc<SyncStateStore>,
    options: SyncOptions,
    running: Vec<OrchestratorHandle>,
}

impl SyncManager {
    /// Creates a manager over the given store client and local store.
    ///
    /// `local` may be `None` while the local store is still opening; no
    /// orchestrator starts until it is set.
    pub fn new(
        client: Arc<dyn StoreClient>,
        local: Option<Arc<dyn StoreHandle>>,
        options: SyncOptions,
    ) -> Self {
        let state = Arc::new(SyncStateStore::new(options.error_message_limit));
        Self { client, local, state, options, running: Vec::new() }
    }

    /// The shared state store UIs observe.
    pub fn state(&self) -> Arc<SyncStateStore> {
        Arc::clone(&self.state)
    }

    /// Sets or clears the local store handle. Takes effect on the next
    /// reconciliation pass.
    pub fn set_local_store(&mut self, local: Option<Arc<dyn StoreHandle>>) {
        self.local = local;
    }

    /// Number of currently running orchestrators.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Brings running orchestrators in line with the given inputs.
    ///
    /// Always tears down every running orchestrator first — cancel, then
    /// await — so no two orchestrators ever own the same server identifier.
    pub async fn reconcile(&mut self, inputs: &SyncInputs, network: &NetworkState) {
        self.stop_all().await;

        self.state.retain_servers(inputs.servers.keys());
        for id in inputs.servers.keys() {
            self.state.ensure_server(id);
        }

        if !inputs.enabled {
            info!("sync is not enabled");
            self.state.update_all_server_status(SyncStatus::NotStarted);
            return;
        }

        let Some(local) = self.local.clone() else {
            warn!("local store is not ready");
            self.state.update_all_server_status(SyncStatus::NotStarted);
            return;
        };

        if !network.is_online() {
            match network.is_connected {
                Some(false) => info!("device is offline"),
                _ => info!("network not ready (unknown status)"),
            }
            self.state.update_all_server_status(SyncStatus::Offline);
            return;
        }

        if network.is_expensive == Some(true) {
            // TODO: skip sync on expensive connections once the setting for
            // it exists in the configuration UI
            debug!(kind = %network.kind, "connection is flagged as expensive");
        }

        self.state.update_all_server_status(SyncStatus::Initializing);

        if inputs.servers.is_empty() {
            info!("no servers configured, skipping");
            return;
        }

        let (enabled, disabled): (Vec<_>, Vec<_>) =
            inputs.servers.iter().partition(|(_, server)| server.enabled);
        for (id, _) in &disabled {
            self.state.update_server_status(id.as_str(), SyncStatus::Disabled);
        }
        info!(
            kind = %network.kind,
            starting = enabled.len(),
            disabled = disabled.len(),
            "starting sync"
        );

        for (id, config) in enabled {
            self.running.push(spawn_orchestrator(
                Arc::clone(&self.client),
                Arc::clone(&local),
                Arc::clone(&self.state),
                id.clone(),
                config.clone(),
                self.options.clone(),
            ));
        }
    }

    /// Reconciles on every change of either input until one of the watch
    /// senders is dropped, then tears everything down.
    ///
    /// A network change of any kind — including a connection-type change
    /// while connectivity stays up — triggers a pass, because running
    /// sessions may be bound to a stale network path.
    pub async fn run(
        &mut self,
        mut inputs_rx: watch::Receiver<SyncInputs>,
        mut network_rx: watch::Receiver<NetworkState>,
    ) {
        loop {
            let inputs = inputs_rx.borrow_and_update().clone();
            let network = network_rx.borrow_and_update().clone();
            self.reconcile(&inputs, &network).await;

            tokio::select! {
                changed = inputs_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = network_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// Cancels every running orchestrator and waits for each to finish.
    pub async fn shutdown(&mut self) {
        self.stop_all().await;
    }

    async fn stop_all(&mut self) {
        if self.running.is_empty() {
            return;
        }
        info!(count = self.running.len(), "cancelling all running sync");
        for handle in &self.running {
            handle.cancel();
        }
        for handle in self.running.drain(..) {
            handle.join().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::collections::BTreeMap;
    use stockpile_store::{Credentials, MemoryNetwork, MemoryStore};

    fn manager_with(local: Option<MemoryStore>) -> (SyncManager, Arc<MemoryNetwork>) {
        let network = Arc::new(MemoryNetwork::new());
        let client: Arc<dyn StoreClient> = Arc::clone(&network) as _;
        let local = local.map(|store| Arc::new(store) as Arc<dyn StoreHandle>);
        (SyncManager::new(client, local, SyncOptions::default()), network)
    }

    fn one_server(enabled: bool) -> SyncInputs {
        let mut servers = BTreeMap::new();
        servers.insert(
            "s1".to_string(),
            ServerConfig::new("Warehouse", "memory://depot", Credentials::new("clerk", "pw"))
                .with_enabled(enabled),
        );
        SyncInputs { enabled: true, servers }
    }

    #[tokio::test]
    async fn disabled_sync_marks_all_servers_not_started() {
        let (mut manager, _network) = manager_with(Some(MemoryStore::new("local")));
        let mut inputs = one_server(true);
        inputs.enabled = false;

        manager.reconcile(&inputs, &NetworkState::connected("wifi")).await;
        let state = manager.state();
        assert_eq!(state.server("s1").unwrap().status, SyncStatus::NotStarted);
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn missing_local_store_marks_all_servers_not_started() {
        let (mut manager, _network) = manager_with(None);

        manager.reconcile(&one_server(true), &NetworkState::connected("wifi")).await;
        assert_eq!(manager.state().server("s1").unwrap().status, SyncStatus::NotStarted);
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn offline_network_marks_all_servers_offline() {
        let (mut manager, _network) = manager_with(Some(MemoryStore::new("local")));

        manager.reconcile(&one_server(true), &NetworkState::offline()).await;
        assert_eq!(manager.state().server("s1").unwrap().status, SyncStatus::Offline);
        assert_eq!(manager.running_count(), 0);

        // Unknown connectivity is treated the same way.
        manager.reconcile(&one_server(true), &NetworkState::default()).await;
        assert_eq!(manager.state().server("s1").unwrap().status, SyncStatus::Offline);
    }

    #[tokio::test]
    async fn disabled_server_gets_disabled_status_and_no_orchestrator() {
        let (mut manager, _network) = manager_with(Some(MemoryStore::new("local")));

        manager.reconcile(&one_server(false), &NetworkState::connected("wifi")).await;
        assert_eq!(manager.state().server("s1").unwrap().status, SyncStatus::Disabled);
        assert_eq!(manager.running_count(), 0);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn deleted_servers_leave_the_state_store() {
        let (mut manager, _network) = manager_with(Some(MemoryStore::new("local")));

        manager.reconcile(&one_server(true), &NetworkState::offline()).await;
        assert!(manager.state().server("s1").is_some());

        manager.reconcile(&SyncInputs::disabled(), &NetworkState::offline()).await;
        assert!(manager.state().server("s1").is_none());
        manager.shutdown().await;
    }
}

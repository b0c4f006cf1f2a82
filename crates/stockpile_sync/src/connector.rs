//! Authenticated connection to one configured server.

use crate::config::ServerConfig;
use crate::state::SyncStateStore;
use crate::status::SyncStatus;
use std::sync::Arc;
use stockpile_store::{StoreClient, StoreError, StoreHandle};
use tracing::{error, info, warn};
use url::Url;

/// Opens an authenticated connection to `config`'s remote store and
/// verifies it is reachable.
///
/// On success returns the handle and mutates nothing. On failure returns
/// `None` after exactly one status write and one error-message write: a
/// network-class failure reports `Offline`, everything else (bad
/// credentials, malformed URI, server-side rejection) reports `Error`.
/// Never propagates an error to the caller.
pub(crate) async fn connect_server(
    client: &dyn StoreClient,
    id: &str,
    config: &ServerConfig,
    state: &SyncStateStore,
) -> Option<Arc<dyn StoreHandle>> {
    if let Err(parse_err) = Url::parse(&config.uri) {
        report_failure(
            id,
            &config.name,
            &StoreError::InvalidUri(format!("{}: {parse_err}", config.uri)),
            state,
        );
        return None;
    }

    let handle = match client.connect(&config.uri, &config.credentials).await {
        Ok(handle) => handle,
        Err(err) => {
            report_failure(id, &config.name, &err, state);
            return None;
        }
    };

    // Reachability probe: an authenticated handle that cannot serve
    // metadata is treated as a failed connection.
    match handle.info().await {
        Ok(store_info) => {
            info!(
                name = %config.name,
                doc_count = store_info.doc_count,
                update_seq = %store_info.update_seq,
                "connected to server"
            );
            Some(handle)
        }
        Err(err) => {
            report_failure(id, &config.name, &err, state);
            None
        }
    }
}

fn report_failure(id: &str, name: &str, err: &StoreError, state: &SyncStateStore) {
    let status = if err.is_network() {
        warn!(name, error = %err, "connect to server failed, treating as offline");
        SyncStatus::Offline
    } else {
        error!(name, error = %err, "connect to server failed");
        SyncStatus::Error
    };
    state.update_server_status(id, status);
    state.set_server_last_error_message(id, err.to_string());
}

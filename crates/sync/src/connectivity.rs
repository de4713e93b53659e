//! Connectivity signal
//!
//! The platform reports `{connected, internet_reachable}`; the device counts
//! as online only when both hold. Going from offline to online is the one
//! external trigger for a sync pass.

use crate::reconciler::{PassOutcome, SyncReconciler};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    /// Apply a platform network report; returns the resulting online flag
    pub fn report(&self, connected: bool, internet_reachable: bool) -> bool {
        let online = connected && internet_reachable;
        self.set_online(online);
        online
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Run a sync pass on every offline-to-online transition.
///
/// Also mirrors connectivity into the reconciler's published sync state.
/// Runs until the returned handle is aborted.
pub fn spawn_reconnect_sync(reconciler: Arc<SyncReconciler>) -> JoinHandle<()> {
    let mut online_rx = reconciler.connectivity().subscribe();

    tokio::spawn(async move {
        let mut previous = *online_rx.borrow_and_update();
        reconciler.state().set_online(previous);

        while online_rx.changed().await.is_ok() {
            let online = *online_rx.borrow_and_update();
            reconciler.state().set_online(online);

            if online && !previous {
                info!("Connection restored, syncing pending data");
                match reconciler.sync_pending_data().await {
                    Ok(PassOutcome::Aborted { shipment_id, error, .. }) => {
                        warn!(shipment_id = %shipment_id, error = %error, "Reconnect sync aborted");
                    }
                    Ok(outcome) => info!(outcome = ?outcome, "Reconnect sync finished"),
                    Err(e) => error!(error = %e, "Reconnect sync failed"),
                }
            }
            previous = online;
        }
    })
}

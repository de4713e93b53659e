//! Sync Reconciler
//!
//! Local-first outbox over the `shipments` table. Every custody event is
//! written locally before any remote call, then confirmed against the
//! remote authority when connectivity allows.
//!
//! # Per-record state
//!
//! ```text
//! PENDING --ok--> SYNCED
//!    |
//!    +--remote failure--> FAILED --next pass--> PENDING
//! ```
//!
//! # Causal rule
//!
//! A trip completion is never sent for a shipment whose pickup the authority
//! has not acknowledged (`pickup_confirmed`). Both `finalize_trip` and the
//! sync pass replay `confirm_pickup` first when needed.

use crate::authority::{AuthorityError, RemoteAuthority};
use crate::connectivity::ConnectivityMonitor;
use crate::state::{SyncSnapshot, SyncState};
use coldchain_core::{
    now_ms, PickupDetails, RecordStore, ShipmentRecord, StoreError, SyncStatus, TripProof,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote authority error: {0}")]
    Remote(#[from] AuthorityError),

    #[error("Shipment not found: {shipment_id}")]
    ShipmentNotFound { shipment_id: String },

    #[error("Shipment {shipment_id} is marked complete but has no trip aggregates")]
    IncompleteRecord { shipment_id: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Why a locally saved event was not confirmed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueReason {
    Offline,
    RemoteFailure(String),
}

/// Result of a local-first operation. The local write always succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    Queued { reason: QueueReason },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced)
    }
}

/// Result of one `sync_pending_data` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was running; nothing was done
    AlreadyRunning,
    /// Connectivity is down; nothing was attempted
    Offline,
    /// Every outstanding record was confirmed
    Completed { synced: usize },
    /// Stopped at the first failing record; earlier records stay SYNCED
    Aborted {
        synced: usize,
        shipment_id: String,
        error: String,
    },
}

/// Releases the single-flight flag on every exit path
struct PassGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct SyncReconciler {
    store: Arc<dyn RecordStore>,
    authority: Arc<dyn RemoteAuthority>,
    connectivity: ConnectivityMonitor,
    state: SyncState,
    pass_running: AtomicBool,
}

impl SyncReconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        authority: Arc<dyn RemoteAuthority>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let state = SyncState::new(connectivity.is_online());
        Self {
            store,
            authority,
            connectivity,
            state,
            pass_running: AtomicBool::new(false),
        }
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Current sync state with live connectivity
    pub fn snapshot(&self) -> SyncSnapshot {
        let mut snapshot = self.state.snapshot();
        snapshot.online = self.connectivity.is_online();
        snapshot
    }

    /// Save a pickup locally, then confirm it right away if online.
    ///
    /// Only a failed local write is an `Err`.
    pub async fn submit_pickup(&self, pickup: PickupDetails) -> Result<SyncOutcome> {
        let record = self.store.insert_shipment(&pickup, now_ms())?;
        info!(shipment_id = %record.shipment_id, "Pickup saved locally");

        if !self.connectivity.is_online() {
            info!(shipment_id = %record.shipment_id, "Offline, pickup queued");
            return Ok(SyncOutcome::Queued {
                reason: QueueReason::Offline,
            });
        }

        let _operation = self.state.begin_operation();
        match self.authority.confirm_pickup(&pickup).await {
            Ok(ack) => {
                self.store.mark_pickup_confirmed(&record.shipment_id)?;
                self.store
                    .set_sync_status(&record.shipment_id, SyncStatus::Synced, None)?;
                self.state.record_success(now_ms());
                info!(
                    shipment_id = %record.shipment_id,
                    reference = ?ack.reference,
                    "Pickup confirmed"
                );
                Ok(SyncOutcome::Synced)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    shipment_id = %record.shipment_id,
                    error = %message,
                    transient = e.is_transient(),
                    "Pickup sync failed, will retry"
                );
                self.store.set_sync_status(
                    &record.shipment_id,
                    SyncStatus::Pending,
                    Some(&message),
                )?;
                self.state.record_error(message.clone());
                Ok(SyncOutcome::Queued {
                    reason: QueueReason::RemoteFailure(message),
                })
            }
        }
    }

    /// Persist trip aggregates and root, then confirm them if online.
    ///
    /// The local write happens even offline. A pickup the authority never
    /// acknowledged is replayed before the completion.
    pub async fn finalize_trip(&self, shipment_id: &str, proof: &TripProof) -> Result<SyncOutcome> {
        self.store.complete_trip(shipment_id, &proof.to_completion())?;
        info!(
            shipment_id,
            merkle_root = %proof.merkle_root,
            leaf_count = proof.leaf_count,
            "Trip completion saved locally"
        );

        if !self.connectivity.is_online() {
            info!(shipment_id, "Offline, trip completion queued");
            return Ok(SyncOutcome::Queued {
                reason: QueueReason::Offline,
            });
        }

        let record = self
            .store
            .get_shipment(shipment_id)?
            .ok_or_else(|| SyncError::ShipmentNotFound {
                shipment_id: shipment_id.to_string(),
            })?;

        let _operation = self.state.begin_operation();
        match self.push_record(&record).await {
            Ok(()) => {
                self.state.record_success(now_ms());
                Ok(SyncOutcome::Synced)
            }
            Err(SyncError::Remote(e)) => {
                let message = e.to_string();
                warn!(shipment_id, error = %message, "Trip completion sync failed");
                self.store
                    .set_sync_status(shipment_id, SyncStatus::Failed, Some(&message))?;
                self.state.record_error(message.clone());
                Ok(SyncOutcome::Queued {
                    reason: QueueReason::RemoteFailure(message),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Drain the outbox in creation order.
    ///
    /// Single-flight: a call made while a pass runs returns
    /// [`PassOutcome::AlreadyRunning`]. The first failing record aborts the
    /// pass and is marked FAILED.
    pub async fn sync_pending_data(&self) -> Result<PassOutcome> {
        if self
            .pass_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync pass already running");
            return Ok(PassOutcome::AlreadyRunning);
        }
        let _guard = PassGuard {
            running: &self.pass_running,
        };

        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync pass");
            return Ok(PassOutcome::Offline);
        }

        let _operation = self.state.begin_operation();

        let pending = match self.store.pending_shipments() {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Could not load pending shipments");
                self.state.record_error(e.to_string());
                return Err(e.into());
            }
        };

        if pending.is_empty() {
            info!("Nothing to sync");
            return Ok(PassOutcome::Completed { synced: 0 });
        }

        info!(count = pending.len(), "Syncing pending shipments");

        let mut synced = 0;
        for record in pending {
            if let Err(e) = self.retry_record(&record).await {
                let message = e.to_string();
                error!(
                    shipment_id = %record.shipment_id,
                    error = %message,
                    synced,
                    "Sync pass aborted"
                );
                if let Err(store_err) = self.store.set_sync_status(
                    &record.shipment_id,
                    SyncStatus::Failed,
                    Some(&message),
                ) {
                    error!(error = %store_err, "Could not record sync failure");
                }
                self.state.record_error(message.clone());
                return Ok(PassOutcome::Aborted {
                    synced,
                    shipment_id: record.shipment_id,
                    error: message,
                });
            }
            synced += 1;
        }

        self.state.record_success(now_ms());
        info!(synced, "All pending data synced");
        Ok(PassOutcome::Completed { synced })
    }

    async fn retry_record(&self, record: &ShipmentRecord) -> Result<()> {
        if record.sync_status == SyncStatus::Failed {
            self.store.set_sync_status(
                &record.shipment_id,
                SyncStatus::Pending,
                record.last_error.as_deref(),
            )?;
        }
        self.push_record(record).await
    }

    /// Push `record` and mark it SYNCED.
    ///
    /// A `finalize_trip` that lands while the remote calls are in flight
    /// changes the row under us. The SYNCED write only applies to the state
    /// that was pushed, otherwise the fresh row is pushed again.
    async fn push_record(&self, record: &ShipmentRecord) -> Result<()> {
        let shipment_id = record.shipment_id.as_str();
        let mut current = record.clone();

        loop {
            self.push_once(&current).await?;
            if self.store.mark_synced_if_unchanged(
                shipment_id,
                current.trip_completed,
                current.merkle_root.as_deref(),
            )? {
                info!(shipment_id, "Shipment synced");
                return Ok(());
            }

            let latest = self
                .store
                .get_shipment(shipment_id)?
                .ok_or_else(|| SyncError::ShipmentNotFound {
                    shipment_id: shipment_id.to_string(),
                })?;
            if !latest.sync_status.is_outstanding() {
                return Ok(());
            }
            debug!(shipment_id, "Shipment changed during sync, pushing again");
            current = latest;
        }
    }

    /// Send whatever the authority has not acknowledged yet, pickup first
    async fn push_once(&self, record: &ShipmentRecord) -> Result<()> {
        let shipment_id = record.shipment_id.as_str();

        if !record.pickup_confirmed {
            debug!(shipment_id, "Confirming pickup");
            self.authority.confirm_pickup(&record.pickup_details()).await?;
            self.store.mark_pickup_confirmed(shipment_id)?;
        }

        if record.trip_completed {
            let completion = record
                .completion()
                .ok_or_else(|| SyncError::IncompleteRecord {
                    shipment_id: shipment_id.to_string(),
                })?;
            debug!(shipment_id, "Sending trip completion");
            self.authority.complete_trip(shipment_id, &completion).await?;
            let batches = self
                .store
                .mark_batches_synced(completion.window_start, completion.window_end)?;
            debug!(shipment_id, batches, "Trip batches marked synced");
        }
        Ok(())
    }
}

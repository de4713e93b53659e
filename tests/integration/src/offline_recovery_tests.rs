//! Offline-first behavior: local writes, reconnect sync, outbox ordering

use crate::test_utils::{pickup, remove_db, sensor_lines, temp_db_path, wait_until, Harness};
use coldchain_core::config::ProofConfig;
use coldchain_core::{RecordStore, SqliteRecordStore, SyncStatus};
use coldchain_sync::{
    spawn_reconnect_sync, AuthorityCall, PassOutcome, QueueReason, SimulatedAuthority,
    SyncIndicator, SyncOutcome,
};
use std::sync::Arc;
use std::time::Duration;

fn confirm(id: &str) -> AuthorityCall {
    AuthorityCall::ConfirmPickup {
        shipment_id: id.to_string(),
    }
}

#[tokio::test]
async fn test_offline_trip_syncs_once_on_reconnect() {
    let harness = Harness::new(false);
    let reconnect = spawn_reconnect_sync(harness.reconciler.clone());

    let outcome = harness
        .reconciler
        .submit_pickup(pickup("SHP-OFF"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Queued {
            reason: QueueReason::Offline
        }
    );

    let summary = harness
        .record_trip("SHP-OFF", sensor_lines(&[(4.0, 85.0); 20]), 20)
        .await;
    let proof = harness
        .proofs
        .generate_trip_proof(summary.started_at, summary.ended_at)
        .unwrap();
    assert_eq!(proof.leaf_count, 2);

    let outcome = harness
        .reconciler
        .finalize_trip("SHP-OFF", &proof)
        .await
        .unwrap();
    assert!(!outcome.is_synced());

    let record = harness.store.get_shipment("SHP-OFF").unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Pending);
    assert!(record.trip_completed);
    assert!(!record.pickup_confirmed);
    assert_eq!(harness.authority.attempts(), 0);
    assert_eq!(harness.reconciler.snapshot().indicator(), SyncIndicator::Offline);

    assert!(harness.reconciler.connectivity().report(true, true));

    let store = harness.store.clone();
    let reconciler = harness.reconciler.clone();
    let settled = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        let reconciler = reconciler.clone();
        async move {
            let synced = store
                .get_shipment("SHP-OFF")
                .ok()
                .flatten()
                .map(|r| r.sync_status == SyncStatus::Synced)
                .unwrap_or(false);
            synced && reconciler.snapshot().indicator() == SyncIndicator::Hidden
        }
    })
    .await;
    assert!(settled, "reconnect sync did not finish");

    assert_eq!(
        harness.authority.calls(),
        vec![
            confirm("SHP-OFF"),
            AuthorityCall::CompleteTrip {
                shipment_id: "SHP-OFF".to_string(),
                merkle_root: proof.merkle_root.clone(),
            },
        ]
    );
    let batches = harness
        .store
        .batches_in_window(summary.started_at, summary.ended_at)
        .unwrap();
    assert!(batches.iter().all(|b| b.synced));

    // A repeated online report is not a transition
    harness.reconciler.connectivity().report(true, true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.authority.attempts(), 2);

    reconnect.abort();
}

#[tokio::test]
async fn test_outbox_drains_in_creation_order() {
    let harness = Harness::new(false);

    for id in ["SHP-A", "SHP-B", "SHP-C"] {
        harness.reconciler.submit_pickup(pickup(id)).await.unwrap();
    }
    // Only B finished its trip while offline
    let proof = harness.proofs.generate_trip_proof(0, 1).unwrap();
    harness.reconciler.finalize_trip("SHP-B", &proof).await.unwrap();

    harness.reconciler.connectivity().set_online(true);
    let outcome = harness.reconciler.sync_pending_data().await.unwrap();
    assert_eq!(outcome, PassOutcome::Completed { synced: 3 });

    assert_eq!(
        harness.authority.calls(),
        vec![
            confirm("SHP-A"),
            confirm("SHP-B"),
            AuthorityCall::CompleteTrip {
                shipment_id: "SHP-B".to_string(),
                merkle_root: String::new(),
            },
            confirm("SHP-C"),
        ]
    );
    assert!(harness.store.pending_shipments().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_completion_recovers_on_next_pass() {
    let harness = Harness::new(true);

    harness.authority.fail_next(1);
    let outcome = harness
        .reconciler
        .submit_pickup(pickup("SHP-RETRY"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SyncOutcome::Queued {
            reason: QueueReason::RemoteFailure(_)
        }
    ));
    let record = harness.store.get_shipment("SHP-RETRY").unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Pending);
    assert!(record.last_error.is_some());

    let summary = harness
        .record_trip("SHP-RETRY", sensor_lines(&[(2.0, 90.0); 10]), 10)
        .await;
    let proof = harness
        .proofs
        .generate_trip_proof(summary.started_at, summary.ended_at)
        .unwrap();

    harness.authority.set_rejecting(true);
    let outcome = harness
        .reconciler
        .finalize_trip("SHP-RETRY", &proof)
        .await
        .unwrap();
    assert!(!outcome.is_synced());
    let record = harness.store.get_shipment("SHP-RETRY").unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Failed);
    assert_eq!(harness.reconciler.snapshot().indicator(), SyncIndicator::Failed);

    harness.authority.set_rejecting(false);
    let outcome = harness.reconciler.sync_pending_data().await.unwrap();
    assert_eq!(outcome, PassOutcome::Completed { synced: 1 });

    let record = harness.store.get_shipment("SHP-RETRY").unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert!(record.pickup_confirmed);
    assert!(record.last_error.is_none());
    assert_eq!(harness.reconciler.snapshot().indicator(), SyncIndicator::Hidden);
}

#[tokio::test]
async fn test_outbox_survives_restart() {
    let path = temp_db_path();

    {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open(&path).unwrap());
        let harness = Harness::with_parts(
            store,
            Arc::new(SimulatedAuthority::new()),
            false,
            ProofConfig::default(),
        );
        harness
            .reconciler
            .submit_pickup(pickup("SHP-PERSIST"))
            .await
            .unwrap();
        let summary = harness
            .record_trip("SHP-PERSIST", sensor_lines(&[(5.0, 70.0); 10]), 10)
            .await;
        let proof = harness
            .proofs
            .generate_trip_proof(summary.started_at, summary.ended_at)
            .unwrap();
        harness
            .reconciler
            .finalize_trip("SHP-PERSIST", &proof)
            .await
            .unwrap();
    }

    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open(&path).unwrap());
    let pending = store.pending_shipments().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].trip_completed);

    let harness = Harness::with_parts(
        store,
        Arc::new(SimulatedAuthority::new()),
        true,
        ProofConfig::default(),
    );
    let outcome = harness.reconciler.sync_pending_data().await.unwrap();
    assert_eq!(outcome, PassOutcome::Completed { synced: 1 });
    assert_eq!(harness.authority.calls().len(), 2);

    drop(harness);
    remove_db(&path);
}

#[tokio::test]
async fn test_concurrent_triggers_run_one_pass() {
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    let authority = Arc::new(SimulatedAuthority::new().with_latency(Duration::from_millis(30)));
    let harness = Harness::with_parts(store, authority, false, ProofConfig::default());

    for id in ["SHP-1", "SHP-2"] {
        harness.reconciler.submit_pickup(pickup(id)).await.unwrap();
    }
    harness.reconciler.connectivity().set_online(true);

    let (first, second) = tokio::join!(
        harness.reconciler.sync_pending_data(),
        harness.reconciler.sync_pending_data()
    );
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, PassOutcome::AlreadyRunning));

    assert_eq!(outcomes[0], PassOutcome::Completed { synced: 2 });
    assert_eq!(outcomes[1], PassOutcome::AlreadyRunning);
    assert_eq!(harness.authority.attempts(), 2);
}

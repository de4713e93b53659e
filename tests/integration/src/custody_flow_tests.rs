//! Online custody flow: pickup, live telemetry, proof, completion

use crate::test_utils::{pickup, sensor_lines, Harness};
use coldchain_core::config::ProofConfig;
use coldchain_core::proof::build_tree;
use coldchain_core::{
    verify_trip_root, HashAlgorithm, MerkleTree, SqliteRecordStore, SyncStatus,
};
use coldchain_sync::{AuthorityCall, SimulatedAuthority, SyncIndicator};
use std::sync::Arc;

/// 10 readings at 3C, 10 at 5C, 5 at 4C
fn three_batch_trip() -> Vec<(f64, f64)> {
    let mut readings = vec![(3.0, 80.0); 10];
    readings.extend(vec![(5.0, 82.0); 10]);
    readings.extend(vec![(4.0, 84.0); 5]);
    readings
}

#[tokio::test]
async fn test_online_trip_end_to_end() {
    let harness = Harness::new(true);

    let outcome = harness
        .reconciler
        .submit_pickup(pickup("SHP-100"))
        .await
        .unwrap();
    assert!(outcome.is_synced());

    let summary = harness
        .record_trip("SHP-100", sensor_lines(&three_batch_trip()), 25)
        .await;
    assert_eq!(summary.shipment_id.as_deref(), Some("SHP-100"));
    let final_batch = summary.final_batch.expect("partial batch flushed on stop");
    assert_eq!(final_batch.reading_count, 5);
    assert_eq!(summary.discarded_readings, 0);

    let proof = harness
        .proofs
        .generate_trip_proof(summary.started_at, summary.ended_at)
        .unwrap();
    assert_eq!(proof.leaf_count, 3);
    assert!((proof.min_temp - 3.0).abs() < 1e-9);
    assert!((proof.max_temp - 5.0).abs() < 1e-9);
    assert!((proof.avg_temp - 4.0).abs() < 1e-9);
    assert_eq!(proof.merkle_root.len(), 64);

    let outcome = harness
        .reconciler
        .finalize_trip("SHP-100", &proof)
        .await
        .unwrap();
    assert!(outcome.is_synced());

    let record = harness.store.get_shipment("SHP-100").unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert!(record.trip_completed);
    assert!(record.pickup_confirmed);
    assert_eq!(record.merkle_root.as_deref(), Some(proof.merkle_root.as_str()));
    assert_eq!(record.trip_window(), Some((summary.started_at, summary.ended_at)));

    let batches = harness
        .store
        .batches_in_window(summary.started_at, summary.ended_at)
        .unwrap();
    assert!(batches.iter().all(|b| b.synced));

    assert_eq!(
        harness.authority.calls(),
        vec![
            AuthorityCall::ConfirmPickup {
                shipment_id: "SHP-100".to_string()
            },
            AuthorityCall::CompleteTrip {
                shipment_id: "SHP-100".to_string(),
                merkle_root: proof.merkle_root.clone(),
            },
        ]
    );
    assert_eq!(harness.reconciler.snapshot().indicator(), SyncIndicator::Hidden);
    assert!(harness.reconciler.snapshot().last_sync_time.is_some());
}

#[tokio::test]
async fn test_auditor_recomputes_root_from_batch_rows() {
    let harness = Harness::new(true);
    harness
        .reconciler
        .submit_pickup(pickup("SHP-200"))
        .await
        .unwrap();
    let summary = harness
        .record_trip("SHP-200", sensor_lines(&three_batch_trip()), 25)
        .await;
    let proof = harness
        .proofs
        .generate_trip_proof(summary.started_at, summary.ended_at)
        .unwrap();

    let mut batches = harness
        .store
        .batches_in_window(summary.started_at, summary.ended_at)
        .unwrap();
    assert!(verify_trip_root(&batches, &proof.merkle_root, proof.algorithm).unwrap());

    // Each batch can be proven against the published root on its own
    let tree = build_tree(&batches, proof.algorithm).unwrap().unwrap();
    assert_eq!(tree.root_hex(), proof.merkle_root);
    for index in 0..batches.len() {
        let inclusion = tree.generate_proof(index).unwrap();
        assert!(MerkleTree::verify_proof(&inclusion).unwrap());
    }

    // A rewritten reading no longer matches
    batches[1].avg_temperature = 4.5;
    assert!(!verify_trip_root(&batches, &proof.merkle_root, proof.algorithm).unwrap());
}

#[tokio::test]
async fn test_malformed_payloads_are_dropped_mid_trip() {
    let harness = Harness::new(true);

    let mut lines = sensor_lines(&[(4.0, 85.0); 5]);
    lines.push("not,a,reading".to_string());
    lines.push("ASSET-001,NaN,85.0,OK".to_string());
    lines.extend(sensor_lines(&[(6.0, 85.0); 5]));

    let summary = harness.record_trip("SHP-300", lines, 10).await;
    assert!(summary.final_batch.is_none());

    let batches = harness
        .store
        .batches_in_window(summary.started_at, summary.ended_at)
        .unwrap();
    assert_eq!(batches.len(), 1);
    assert!((batches[0].avg_temperature - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_blake3_proof_with_humidity_stats() {
    let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    let config = ProofConfig {
        hash: HashAlgorithm::Blake3,
        include_humidity_stats: true,
    };
    let harness = Harness::with_parts(store, Arc::new(SimulatedAuthority::new()), true, config);

    let summary = harness
        .record_trip("SHP-400", sensor_lines(&three_batch_trip()), 25)
        .await;
    let proof = harness
        .proofs
        .generate_trip_proof(summary.started_at, summary.ended_at)
        .unwrap();

    assert_eq!(proof.algorithm, HashAlgorithm::Blake3);
    let humidity = proof.humidity.expect("humidity stats requested");
    assert!((humidity.min - 80.0).abs() < 1e-9);
    assert!((humidity.max - 84.0).abs() < 1e-9);
    assert!((humidity.avg - 82.0).abs() < 1e-9);

    let batches = harness
        .store
        .batches_in_window(summary.started_at, summary.ended_at)
        .unwrap();
    assert!(verify_trip_root(&batches, &proof.merkle_root, HashAlgorithm::Blake3).unwrap());
    assert!(!verify_trip_root(&batches, &proof.merkle_root, HashAlgorithm::Sha256).unwrap());
}

#[tokio::test]
async fn test_trip_proof_serializes_for_handoff() {
    let harness = Harness::new(true);
    let summary = harness
        .record_trip("SHP-500", sensor_lines(&three_batch_trip()), 25)
        .await;
    let proof = harness
        .proofs
        .generate_trip_proof(summary.started_at, summary.ended_at)
        .unwrap();

    let json = serde_json::to_value(&proof).unwrap();
    assert_eq!(json["merkle_root"], proof.merkle_root.as_str());
    assert_eq!(json["leaf_count"], 3);
}

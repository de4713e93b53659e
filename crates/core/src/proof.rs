//! Integrity Proof Builder
//!
//! Turns the batch rows of a trip window into a tamper-evident summary: a
//! Merkle root over one leaf per batch plus min/max/mean temperature.
//!
//! Leaf preimage is the canonical string `start|end|avgTemperature|avgHumidity`
//! using each field's shortest decimal form (`4.0` renders as `4`). Leaves are
//! taken in store order (ascending `start_time`, then `id`), so any holder of
//! the same batch set can recompute the root with [`verify_trip_root`].

use crate::config::ProofConfig;
use crate::merkle::{Hash, HashAlgorithm, MerkleError, MerkleTree};
use crate::store::{RecordStore, StoreError};
use crate::types::{Batch, Timestamp, TripCompletion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("Invalid trip window: start {start} is after end {end}")]
    InvalidWindow { start: Timestamp, end: Timestamp },
}

pub type Result<T> = std::result::Result<T, ProofError>;

/// Humidity aggregates, reported only when enabled in [`ProofConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HumidityStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Recomputable summary of a trip's batch rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripProof {
    /// Lowercase hex root, empty when the window holds no batches
    pub merkle_root: String,
    pub leaf_count: usize,
    pub min_temp: f64,
    pub max_temp: f64,
    pub avg_temp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<HumidityStats>,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub algorithm: HashAlgorithm,
}

impl TripProof {
    fn empty(window_start: Timestamp, window_end: Timestamp, algorithm: HashAlgorithm) -> Self {
        Self {
            merkle_root: String::new(),
            leaf_count: 0,
            min_temp: 0.0,
            max_temp: 0.0,
            avg_temp: 0.0,
            humidity: None,
            window_start,
            window_end,
            algorithm,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Aggregates in the shape the record store persists
    pub fn to_completion(&self) -> TripCompletion {
        TripCompletion {
            min_temp: self.min_temp,
            max_temp: self.max_temp,
            avg_temp: self.avg_temp,
            min_humidity: self.humidity.map(|h| h.min),
            max_humidity: self.humidity.map(|h| h.max),
            avg_humidity: self.humidity.map(|h| h.avg),
            merkle_root: self.merkle_root.clone(),
            window_start: self.window_start,
            window_end: self.window_end,
        }
    }
}

/// Canonical leaf preimage for a batch row
pub fn leaf_preimage(batch: &Batch) -> String {
    format!(
        "{}|{}|{}|{}",
        batch.start_time, batch.end_time, batch.avg_temperature, batch.avg_humidity
    )
}

pub fn leaf_hash(batch: &Batch, algorithm: HashAlgorithm) -> Hash {
    algorithm.digest(leaf_preimage(batch).as_bytes())
}

/// Build the tree over batches in the given order; `None` for an empty set
pub fn build_tree(batches: &[Batch], algorithm: HashAlgorithm) -> Result<Option<MerkleTree>> {
    if batches.is_empty() {
        return Ok(None);
    }
    let leaves = batches.iter().map(|b| leaf_hash(b, algorithm)).collect();
    Ok(Some(MerkleTree::build(leaves, algorithm)?))
}

/// Recompute the root over `batches` and compare with `expected_root`.
///
/// An empty batch set matches only the empty root.
pub fn verify_trip_root(
    batches: &[Batch],
    expected_root: &str,
    algorithm: HashAlgorithm,
) -> Result<bool> {
    let computed = build_tree(batches, algorithm)?
        .map(|tree| tree.root_hex())
        .unwrap_or_default();
    Ok(computed.eq_ignore_ascii_case(expected_root))
}

fn min_max_mean(values: impl Iterator<Item = f64>) -> (f64, f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut count = 0usize;

    for value in values {
        min = min.min(value);
        max = max.max(value);
        sum += value;
        count += 1;
    }

    if count == 0 {
        return (0.0, 0.0, 0.0);
    }
    (min, max, sum / count as f64)
}

/// Builds [`TripProof`]s from the record store
pub struct ProofBuilder {
    store: Arc<dyn RecordStore>,
    config: ProofConfig,
}

impl ProofBuilder {
    pub fn new(store: Arc<dyn RecordStore>, config: ProofConfig) -> Self {
        Self { store, config }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.config.hash
    }

    /// Generate the proof for all batches inside `[start_time, end_time]`.
    ///
    /// A window without batches yields an empty root and zeroed statistics.
    pub fn generate_trip_proof(&self, start_time: Timestamp, end_time: Timestamp) -> Result<TripProof> {
        if start_time > end_time {
            return Err(ProofError::InvalidWindow {
                start: start_time,
                end: end_time,
            });
        }

        let algorithm = self.config.hash;
        let batches = self.store.batches_in_window(start_time, end_time)?;

        let tree = match build_tree(&batches, algorithm)? {
            Some(tree) => tree,
            None => {
                info!(start_time, end_time, "No batches in trip window, returning empty proof");
                return Ok(TripProof::empty(start_time, end_time, algorithm));
            }
        };

        let (min_temp, max_temp, avg_temp) = min_max_mean(batches.iter().map(|b| b.avg_temperature));
        let humidity = self.config.include_humidity_stats.then(|| {
            let (min, max, avg) = min_max_mean(batches.iter().map(|b| b.avg_humidity));
            HumidityStats { min, max, avg }
        });

        let proof = TripProof {
            merkle_root: tree.root_hex(),
            leaf_count: tree.leaf_count(),
            min_temp,
            max_temp,
            avg_temp,
            humidity,
            window_start: start_time,
            window_end: end_time,
            algorithm,
        };

        debug!(
            leaf_count = proof.leaf_count,
            merkle_root = %proof.merkle_root,
            "Trip proof generated"
        );

        Ok(proof)
    }
}

//! Telemetry Batching Engine
//!
//! Stateless over the buffer: the caller owns the readings and hands a
//! snapshot to [`BatchingEngine::process_batch`], which computes means and
//! writes one immutable batch row.

use crate::error::BatchError;
use coldchain_core::{now_ms, NewBatch, RecordStore, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Readings per batch unless configured otherwise
pub const DEFAULT_BATCH_THRESHOLD: usize = 10;

/// Result of one flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Row id assigned by the store
    pub batch_id: i64,
    /// Mean temperature of the flushed readings
    pub avg_temperature: f64,
    /// Mean humidity of the flushed readings
    pub avg_humidity: f64,
    /// Window start supplied by the caller
    pub start_time: Timestamp,
    /// Flush time
    pub end_time: Timestamp,
    /// Number of readings aggregated
    pub reading_count: usize,
}

/// Aggregates reading windows into persisted batches
pub struct BatchingEngine {
    store: Arc<dyn RecordStore>,
    threshold: usize,
}

impl BatchingEngine {
    /// Create an engine; a zero threshold is treated as 1
    pub fn new(store: Arc<dyn RecordStore>, threshold: usize) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
        }
    }

    /// Readings per batch
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether `buffered_count` readings should be flushed now
    pub fn should_flush(&self, buffered_count: usize) -> bool {
        buffered_count >= self.threshold
    }

    /// Average the readings and persist one batch ending now.
    ///
    /// Empty input fails with [`BatchError::EmptyBatch`] without touching the store.
    pub fn process_batch(
        &self,
        temperatures: &[f64],
        humidities: &[f64],
        start_time: Timestamp,
    ) -> Result<BatchSummary, BatchError> {
        if temperatures.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        if temperatures.len() != humidities.len() {
            return Err(BatchError::LengthMismatch {
                temperatures: temperatures.len(),
                humidities: humidities.len(),
            });
        }

        let count = temperatures.len() as f64;
        let avg_temperature = temperatures.iter().sum::<f64>() / count;
        let avg_humidity = humidities.iter().sum::<f64>() / count;
        // Never end before the window starts, even if the clock stepped back
        let end_time = now_ms().max(start_time);

        let batch = self.store.insert_batch(&NewBatch {
            start_time,
            end_time,
            avg_temperature,
            avg_humidity,
        })?;

        debug!(
            batch_id = batch.id,
            readings = temperatures.len(),
            avg_temperature,
            avg_humidity,
            "Batch flushed"
        );

        Ok(BatchSummary {
            batch_id: batch.id,
            avg_temperature,
            avg_humidity,
            start_time,
            end_time,
            reading_count: temperatures.len(),
        })
    }
}

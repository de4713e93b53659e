//! Trip state and the trip manager
//!
//! [`TripManager`] owns the in-memory state of the active trip behind one
//! async mutex. Each payload is decoded, appended and threshold-checked
//! under that lock, and a flush takes the buffer and clears it in the same
//! critical section. A reading can therefore never be counted twice or fall
//! between two batches, however payloads interleave.

use crate::batcher::{BatchSummary, BatchingEngine};
use crate::decoder::decode_payload;
use crate::error::TripError;
use coldchain_core::config::BatchingConfig;
use coldchain_core::{now_ms, SensorReading, Timestamp};
use coldchain_session::{ConnectionStatus, SessionEvents};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Entries kept in the trip activity log
pub const TRIP_LOG_CAPACITY: usize = 10;

/// Bounded activity log, newest entry first
#[derive(Debug, Clone, Default)]
pub struct TripLog {
    entries: VecDeque<String>,
}

impl TripLog {
    /// Record `message` prefixed with the local wall-clock time
    pub fn push(&mut self, message: impl AsRef<str>) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.entries
            .push_front(format!("[{}] {}", stamp, message.as_ref()));
        self.entries.truncate(TRIP_LOG_CAPACITY);
    }

    /// Entries, newest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Serializable trip state. The connection status is not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripSnapshot {
    /// Whether a trip is recording
    pub recording: bool,
    /// Readings not yet flushed
    pub buffer: Vec<SensorReading>,
    /// Start of the batch being accumulated
    pub batch_start_time: Option<Timestamp>,
    /// Start of the trip window
    pub trip_started_at: Option<Timestamp>,
    /// Shipment the trip belongs to
    pub active_shipment_id: Option<String>,
    /// Activity log, newest first
    pub log: Vec<String>,
}

/// Outcome of stopping a trip
#[derive(Debug, Clone, PartialEq)]
pub struct TripSummary {
    /// Shipment the trip belonged to
    pub shipment_id: Option<String>,
    /// Trip window start
    pub started_at: Timestamp,
    /// Trip window end
    pub ended_at: Timestamp,
    /// Short batch written from the remaining buffer, if any
    pub final_batch: Option<BatchSummary>,
    /// Readings thrown away because partial flushes are disabled
    pub discarded_readings: usize,
}

#[derive(Debug, Default)]
struct TripState {
    recording: bool,
    connection_status: ConnectionStatus,
    buffer: Vec<SensorReading>,
    batch_start_time: Option<Timestamp>,
    trip_started_at: Option<Timestamp>,
    active_shipment_id: Option<String>,
    log: TripLog,
}

impl TripState {
    /// Take the whole buffer and persist it as one batch.
    ///
    /// On failure the buffer is put back untouched. The batch insert is a
    /// single short SQLite write and runs under the trip lock so the buffer
    /// take and the insert stay one step for concurrent payloads.
    fn flush(&mut self, engine: &BatchingEngine) -> Result<BatchSummary, TripError> {
        let readings = std::mem::take(&mut self.buffer);
        let start_time = self
            .batch_start_time
            .or_else(|| readings.first().map(|r| r.captured_at))
            .unwrap_or_else(now_ms);

        let temperatures: Vec<f64> = readings.iter().map(|r| r.temperature).collect();
        let humidities: Vec<f64> = readings.iter().map(|r| r.humidity).collect();

        match engine.process_batch(&temperatures, &humidities, start_time) {
            Ok(summary) => {
                self.batch_start_time = Some(summary.end_time);
                self.log.push(format!(
                    "Batch saved: {} readings, avg {:.2}C",
                    summary.reading_count, summary.avg_temperature
                ));
                Ok(summary)
            }
            Err(e) => {
                self.buffer = readings;
                Err(e.into())
            }
        }
    }
}

/// Owns the active trip and feeds the batching engine
pub struct TripManager {
    engine: BatchingEngine,
    flush_partial_on_stop: bool,
    state: Mutex<TripState>,
}

impl TripManager {
    /// Create a manager with no trip recording
    pub fn new(engine: BatchingEngine, config: &BatchingConfig) -> Self {
        Self {
            engine,
            flush_partial_on_stop: config.flush_partial_on_stop,
            state: Mutex::new(TripState::default()),
        }
    }

    /// Begin recording; returns the trip start time
    pub async fn start_trip(&self, shipment_id: Option<String>) -> Result<Timestamp, TripError> {
        let mut state = self.state.lock().await;
        if state.recording {
            return Err(TripError::AlreadyRecording);
        }

        let started_at = now_ms();
        let message = match &shipment_id {
            Some(id) => format!("Trip started for {id}"),
            None => "Trip started".to_string(),
        };
        state.recording = true;
        state.buffer.clear();
        state.batch_start_time = Some(started_at);
        state.trip_started_at = Some(started_at);
        state.active_shipment_id = shipment_id;
        state.log.clear();
        state.log.push(message);

        info!(
            shipment_id = ?state.active_shipment_id,
            started_at,
            "Trip recording started"
        );
        Ok(started_at)
    }

    /// Stop recording, flushing a short final batch when configured.
    ///
    /// If that flush fails the trip keeps recording and the error is returned.
    pub async fn stop_trip(&self) -> Result<TripSummary, TripError> {
        let mut state = self.state.lock().await;
        if !state.recording {
            return Err(TripError::NotRecording);
        }

        let mut final_batch = None;
        let mut discarded_readings = 0;
        if !state.buffer.is_empty() {
            if self.flush_partial_on_stop {
                final_batch = Some(state.flush(&self.engine)?);
            } else {
                discarded_readings = state.buffer.len();
                state.buffer.clear();
            }
        }

        let ended_at = now_ms();
        let started_at = state.trip_started_at.unwrap_or(ended_at);
        let shipment_id = state.active_shipment_id.take();

        state.recording = false;
        state.batch_start_time = None;
        state.trip_started_at = None;
        state.log.push("Trip stopped");

        info!(
            shipment_id = ?shipment_id,
            started_at,
            ended_at,
            discarded_readings,
            "Trip recording stopped"
        );

        Ok(TripSummary {
            shipment_id,
            started_at,
            ended_at,
            final_batch,
            discarded_readings,
        })
    }

    /// Record the latest session status
    pub async fn set_connection_status(&self, status: ConnectionStatus) {
        let mut state = self.state.lock().await;
        if state.connection_status == status {
            return;
        }
        state.connection_status = status;
        if status.is_error() && state.recording {
            let buffered = state.buffer.len();
            warn!(status = %status, buffered, "Sensor link error while recording");
            state.log.push(format!(
                "Status: {} ({} readings buffered)",
                status.label(),
                buffered
            ));
        } else {
            state.log.push(format!("Status: {}", status.label()));
        }
    }

    /// Decode one payload and buffer it, flushing at the threshold.
    ///
    /// Malformed payloads and payloads outside a recording are dropped and
    /// yield `Ok(None)`. A failed flush keeps every reading buffered.
    pub async fn handle_payload(&self, encoded: &str) -> Result<Option<BatchSummary>, TripError> {
        let decoded = match decode_payload(encoded, now_ms()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Dropping malformed payload");
                return Ok(None);
            }
        };

        let mut state = self.state.lock().await;
        if !state.recording {
            debug!(asset_id = %decoded.asset_id, "Payload received while not recording");
            return Ok(None);
        }

        state.buffer.push(decoded.reading);
        if !self.engine.should_flush(state.buffer.len()) {
            return Ok(None);
        }

        match state.flush(&self.engine) {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                error!(error = %e, buffered = state.buffer.len(), "Batch flush failed");
                Err(e)
            }
        }
    }

    /// Whether a trip is recording
    pub async fn is_recording(&self) -> bool {
        self.state.lock().await.recording
    }

    /// Readings waiting for the next flush
    pub async fn buffered_count(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    /// Last reported session status
    pub async fn connection_status(&self) -> ConnectionStatus {
        self.state.lock().await.connection_status
    }

    /// Shipment of the recording trip
    pub async fn active_shipment_id(&self) -> Option<String> {
        self.state.lock().await.active_shipment_id.clone()
    }

    /// Activity log, newest first
    pub async fn log_entries(&self) -> Vec<String> {
        self.state.lock().await.log.entries()
    }

    /// Capture the persistable part of the trip
    pub async fn snapshot(&self) -> TripSnapshot {
        let state = self.state.lock().await;
        TripSnapshot {
            recording: state.recording,
            buffer: state.buffer.clone(),
            batch_start_time: state.batch_start_time,
            trip_started_at: state.trip_started_at,
            active_shipment_id: state.active_shipment_id.clone(),
            log: state.log.entries(),
        }
    }

    /// Replace the trip with a snapshot. Connection status restarts at `Idle`.
    pub async fn restore(&self, snapshot: TripSnapshot) {
        let mut state = self.state.lock().await;
        *state = TripState {
            recording: snapshot.recording,
            connection_status: ConnectionStatus::Idle,
            buffer: snapshot.buffer,
            batch_start_time: snapshot.batch_start_time,
            trip_started_at: snapshot.trip_started_at,
            active_shipment_id: snapshot.active_shipment_id,
            log: TripLog {
                entries: snapshot
                    .log
                    .into_iter()
                    .take(TRIP_LOG_CAPACITY)
                    .collect(),
            },
        };
        info!(
            recording = state.recording,
            buffered = state.buffer.len(),
            "Trip state restored"
        );
    }

    /// Consume a session's events until both streams close
    pub fn attach(self: &Arc<Self>, mut events: SessionEvents) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut status_open = true;
            let mut payloads_open = true;

            while status_open || payloads_open {
                tokio::select! {
                    status = events.status.recv(), if status_open => match status {
                        Some(status) => manager.set_connection_status(status).await,
                        None => status_open = false,
                    },
                    payload = events.payloads.recv(), if payloads_open => match payload {
                        Some(payload) => {
                            if let Err(e) = manager.handle_payload(&payload).await {
                                error!(error = %e, "Failed to process telemetry payload");
                            }
                        }
                        None => payloads_open = false,
                    },
                }
            }
            debug!("Session event streams closed");
        })
    }
}

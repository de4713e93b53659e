//! Core types shared by the session, stream and sync crates.
//!
//! Timestamps are Unix milliseconds (`i64`), matching the column type used by
//! the record store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Unix timestamp in milliseconds
pub type Timestamp = i64;

/// Current wall-clock time in Unix milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// One decoded sensor sample. Never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Temperature in Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Time the payload was decoded
    pub captured_at: Timestamp,
}

/// A persisted aggregate over consecutive readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Local row identifier
    pub id: i64,
    /// First reading window boundary
    pub start_time: Timestamp,
    /// Flush time
    pub end_time: Timestamp,
    /// Mean temperature over the window
    pub avg_temperature: f64,
    /// Mean humidity over the window
    pub avg_humidity: f64,
    /// Whether the batch has been confirmed remotely
    pub synced: bool,
}

/// Insert form of [`Batch`]; the store assigns the id and `synced = false`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewBatch {
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
}

/// Remote confirmation state of a shipment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Saved locally, not yet confirmed
    Pending,
    /// Confirmed by the remote authority
    Synced,
    /// Last attempt failed; retried on the next sync trigger
    Failed,
}

impl SyncStatus {
    /// Column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
        }
    }

    /// Whether the record still belongs to the outbox
    pub fn is_outstanding(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown sync status string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sync status: {0}")]
pub struct UnknownSyncStatus(pub String);

impl FromStr for SyncStatus {
    type Err = UnknownSyncStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SyncStatus::Pending),
            "SYNCED" => Ok(SyncStatus::Synced),
            "FAILED" => Ok(SyncStatus::Failed),
            other => Err(UnknownSyncStatus(other.to_string())),
        }
    }
}

/// Custody details captured at pickup time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupDetails {
    /// Globally unique shipment identifier
    pub shipment_id: String,
    pub produce_type: String,
    pub supplier_id: String,
    pub farmer_name: String,
    pub pickup_location: String,
    pub weight_kg: f64,
    pub notes: Option<String>,
}

/// Trip-level aggregates written when a trip completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripCompletion {
    pub min_temp: f64,
    pub max_temp: f64,
    pub avg_temp: f64,
    pub min_humidity: Option<f64>,
    pub max_humidity: Option<f64>,
    pub avg_humidity: Option<f64>,
    /// Lowercase hex Merkle root over the trip's batches
    pub merkle_root: String,
    /// Trip window start (inclusive)
    pub window_start: Timestamp,
    /// Trip window end (inclusive)
    pub window_end: Timestamp,
}

/// The durable custody record for one shipment.
///
/// `trip_completed` implies the temperature aggregates and `merkle_root` are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    /// Local row identifier (creation order)
    pub id: i64,
    pub shipment_id: String,
    pub produce_type: String,
    pub supplier_id: String,
    pub farmer_name: String,
    pub pickup_location: String,
    pub weight_kg: f64,
    pub notes: Option<String>,
    pub recorded_at: Timestamp,
    pub trip_completed: bool,
    pub trip_started_at: Option<Timestamp>,
    pub trip_ended_at: Option<Timestamp>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub avg_temp_aggregate: Option<f64>,
    pub min_humidity: Option<f64>,
    pub max_humidity: Option<f64>,
    pub avg_humidity_aggregate: Option<f64>,
    pub merkle_root: Option<String>,
    pub sync_status: SyncStatus,
    /// Whether the remote authority has acknowledged the pickup
    pub pickup_confirmed: bool,
    /// Last remote or storage error observed while syncing this record
    pub last_error: Option<String>,
}

impl ShipmentRecord {
    /// The pickup fields as originally captured
    pub fn pickup_details(&self) -> PickupDetails {
        PickupDetails {
            shipment_id: self.shipment_id.clone(),
            produce_type: self.produce_type.clone(),
            supplier_id: self.supplier_id.clone(),
            farmer_name: self.farmer_name.clone(),
            pickup_location: self.pickup_location.clone(),
            weight_kg: self.weight_kg,
            notes: self.notes.clone(),
        }
    }

    /// Trip window, if the trip has been finalized
    pub fn trip_window(&self) -> Option<(Timestamp, Timestamp)> {
        match (self.trip_started_at, self.trip_ended_at) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Trip aggregates, if the trip has been finalized
    pub fn completion(&self) -> Option<TripCompletion> {
        if !self.trip_completed {
            return None;
        }
        let (window_start, window_end) = self.trip_window()?;
        Some(TripCompletion {
            min_temp: self.min_temp?,
            max_temp: self.max_temp?,
            avg_temp: self.avg_temp_aggregate?,
            min_humidity: self.min_humidity,
            max_humidity: self.max_humidity,
            avg_humidity: self.avg_humidity_aggregate,
            merkle_root: self.merkle_root.clone()?,
            window_start,
            window_end,
        })
    }
}

//! Coldchain Stream
//!
//! Telemetry intake for an active trip: payload decoding, the batching
//! engine and the trip manager that ties them to a telemetry session.

#![warn(missing_docs)]

pub mod batcher;
pub mod decoder;
pub mod error;
pub mod trip;

pub use batcher::{BatchSummary, BatchingEngine, DEFAULT_BATCH_THRESHOLD};
pub use decoder::{decode_payload, parse_line, DecodedPayload};
pub use error::{BatchError, DecodeError, TripError};
pub use trip::{TripLog, TripManager, TripSnapshot, TripSummary, TRIP_LOG_CAPACITY};

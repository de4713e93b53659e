//! Error types for telemetry decoding, batching and trip control.

use coldchain_core::StoreError;
use thiserror::Error;

/// Errors decoding one raw payload. Payloads that fail are dropped, never retried.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload was not valid base64
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded bytes were not UTF-8
    #[error("Payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Fewer than `id,temperature,humidity`
    #[error("Expected at least 3 fields, got {count}")]
    TooFewFields {
        /// Number of fields found
        count: usize,
    },

    /// Temperature or humidity was not a finite decimal number
    #[error("Invalid {field} value: {value:?}")]
    InvalidNumber {
        /// Which field failed
        field: &'static str,
        /// The raw field text
        value: String,
    },
}

/// Errors from the batching engine.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Nothing to aggregate; no row is written
    #[error("Cannot aggregate an empty batch")]
    EmptyBatch,

    /// Temperature and humidity slices must pair up
    #[error("Reading count mismatch: {temperatures} temperatures, {humidities} humidities")]
    LengthMismatch {
        /// Temperatures supplied
        temperatures: usize,
        /// Humidities supplied
        humidities: usize,
    },

    /// The batch row could not be written
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from trip control.
#[derive(Debug, Error)]
pub enum TripError {
    /// `start_trip` while a trip is recording
    #[error("A trip is already recording")]
    AlreadyRecording,

    /// `stop_trip` with no trip recording
    #[error("No trip is recording")]
    NotRecording,

    /// Flushing the buffer failed; the buffer is kept
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),
}

//! Core functionality for the cold-chain custody agent.
//!
//! This crate provides the data model, configuration, logging setup, the
//! record store and the Integrity Proof Builder shared by the session, stream
//! and sync crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod merkle;
pub mod proof;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{CoreError, Result};
pub use merkle::{Hash as MerkleHash, HashAlgorithm, InclusionProof, MerkleError, MerkleTree};
pub use proof::{verify_trip_root, HumidityStats, ProofBuilder, ProofError, TripProof};
#[cfg(feature = "sqlite")]
pub use store::SqliteRecordStore;
pub use store::{RecordStore, StoreError};
pub use types::{
    now_ms, Batch, NewBatch, PickupDetails, SensorReading, ShipmentRecord, SyncStatus, Timestamp,
    TripCompletion,
};

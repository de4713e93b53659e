//! End-to-end tests across the session, stream and sync crates
//!
//! This test suite validates:
//! - A simulated sensor feeding a recording trip through to persisted batches
//! - Trip proofs that a third party can recompute from the batch rows
//! - The offline outbox draining in order once connectivity returns

pub mod test_utils;

#[cfg(test)]
mod custody_flow_tests;

#[cfg(test)]
mod offline_recovery_tests;

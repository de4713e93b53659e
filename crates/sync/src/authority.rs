//! Remote authority seam
//!
//! Both calls must be idempotent per shipment ID: the reconciler replays
//! them after partial failures.

use async_trait::async_trait;
use coldchain_core::{PickupDetails, TripCompletion};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Acknowledgement returned by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub shipment_id: String,
    /// Remote transaction reference, if the authority issues one
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("Transient remote failure: {0}")]
    Transient(String),

    #[error("Remote authority rejected the request: {0}")]
    Rejected(String),
}

impl AuthorityError {
    /// Transient failures are expected to clear on their own
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthorityError::Transient(_))
    }
}

#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn confirm_pickup(&self, pickup: &PickupDetails) -> Result<Ack, AuthorityError>;

    async fn complete_trip(
        &self,
        shipment_id: &str,
        completion: &TripCompletion,
    ) -> Result<Ack, AuthorityError>;
}

/// A successful call, as recorded by [`SimulatedAuthority`]
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityCall {
    ConfirmPickup { shipment_id: String },
    CompleteTrip { shipment_id: String, merkle_root: String },
}

/// In-process authority with fixed latency and failure injection.
///
/// Stands in for the ledger client in dry runs and tests.
pub struct SimulatedAuthority {
    latency: Duration,
    calls: Mutex<Vec<AuthorityCall>>,
    attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
    /// Attempt number from which every call fails
    fail_from: AtomicUsize,
    rejecting: AtomicBool,
}

impl Default for SimulatedAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAuthority {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            fail_from: AtomicUsize::new(usize::MAX),
            rejecting: AtomicBool::new(false),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Let the next `successes` calls through, then fail every call
    pub fn fail_after(&self, successes: usize) {
        let from = self.attempts().saturating_add(successes);
        self.fail_from.store(from, Ordering::SeqCst);
    }

    /// Cancel `fail_next` and `fail_after`
    pub fn clear_failures(&self) {
        self.failures_remaining.store(0, Ordering::SeqCst);
        self.fail_from.store(usize::MAX, Ordering::SeqCst);
    }

    /// Reject every call until switched off
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Successful calls in order
    pub fn calls(&self) -> Vec<AuthorityCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// All calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn respond(&self, call: AuthorityCall) -> Result<Ack, AuthorityError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let shipment_id = match &call {
            AuthorityCall::ConfirmPickup { shipment_id } => shipment_id.clone(),
            AuthorityCall::CompleteTrip { shipment_id, .. } => shipment_id.clone(),
        };

        if self.rejecting.load(Ordering::SeqCst) {
            warn!(shipment_id = %shipment_id, "Simulated authority rejected call");
            return Err(AuthorityError::Rejected(format!(
                "shipment {shipment_id} rejected"
            )));
        }

        let failing = attempt >= self.fail_from.load(Ordering::SeqCst)
            || self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            warn!(shipment_id = %shipment_id, "Simulated authority unavailable");
            return Err(AuthorityError::Transient("ledger endpoint unreachable".to_string()));
        }

        info!(call = ?call, "Simulated authority accepted call");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }

        Ok(Ack {
            reference: Some(format!("sim-{}", attempt + 1)),
            shipment_id,
        })
    }
}

#[async_trait]
impl RemoteAuthority for SimulatedAuthority {
    async fn confirm_pickup(&self, pickup: &PickupDetails) -> Result<Ack, AuthorityError> {
        self.respond(AuthorityCall::ConfirmPickup {
            shipment_id: pickup.shipment_id.clone(),
        })
        .await
    }

    async fn complete_trip(
        &self,
        shipment_id: &str,
        completion: &TripCompletion,
    ) -> Result<Ack, AuthorityError> {
        self.respond(AuthorityCall::CompleteTrip {
            shipment_id: shipment_id.to_string(),
            merkle_root: completion.merkle_root.clone(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pickup() -> PickupDetails {
        PickupDetails {
            shipment_id: "SHP-1".to_string(),
            produce_type: "Lettuce".to_string(),
            supplier_id: "SUP-9".to_string(),
            farmer_name: "B. Grower".to_string(),
            pickup_location: "Valley Farm".to_string(),
            weight_kg: 40.0,
            notes: Some("keep upright".to_string()),
        }
    }

    #[tokio::test]
    async fn test_failure_injection_is_counted() {
        let authority = SimulatedAuthority::new();
        authority.fail_next(2);

        assert!(authority.confirm_pickup(&pickup()).await.unwrap_err().is_transient());
        assert!(authority.confirm_pickup(&pickup()).await.is_err());
        assert!(authority.confirm_pickup(&pickup()).await.is_ok());

        assert_eq!(authority.attempts(), 3);
        assert_eq!(
            authority.calls(),
            vec![AuthorityCall::ConfirmPickup {
                shipment_id: "SHP-1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_rejection() {
        let authority = SimulatedAuthority::new();
        authority.set_rejecting(true);

        let err = authority.confirm_pickup(&pickup()).await.unwrap_err();
        assert!(matches!(err, AuthorityError::Rejected(_)));
        assert!(!err.is_transient());
        assert!(authority.calls().is_empty());
    }
}

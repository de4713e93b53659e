//! Telemetry session for the cold-chain agent
//!
//! This crate owns the connection to one wireless sensor:
//! - [`ConnectionStatus`]: the closed set of lifecycle states and their labels
//! - [`TelemetrySource`] / [`SourceConnection`]: the byte-stream transport seam
//! - [`TelemetrySession`]: the state machine driving scan, connect, subscribe
//!   and teardown
//! - [`SimulatedSource`]: an in-process sensor for dry runs and tests
//!
//! # Example
//!
//! ```no_run
//! use coldchain_core::config::DeviceConfig;
//! use coldchain_session::{SimulatedSource, TelemetrySession};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let source = Arc::new(SimulatedSource::new("LogisticsSim").with_generated_readings(30));
//! let (session, mut events) = TelemetrySession::new(source, DeviceConfig::default());
//! session.start().await;
//! while let Some(payload) = events.payloads.recv().await {
//!     println!("{payload}");
//! }
//! # }
//! ```

pub mod session;
pub mod sim;
pub mod status;
pub mod transport;

pub use session::{SessionEvents, TelemetrySession};
pub use sim::{encode_payload, SimulatedSource, SourceStats};
pub use status::ConnectionStatus;
pub use transport::{
    CharacteristicId, DiscoveredDevice, DiscoveryStream, SourceConnection, Subscription,
    TelemetrySource, TransportError,
};

//! Byte-stream source abstraction
//!
//! A [`TelemetrySource`] discovers advertising devices and opens
//! [`SourceConnection`]s. A connection exposes one notify-style
//! characteristic as a [`Subscription`]: encoded payloads on one channel,
//! link errors on another.

use async_trait::async_trait;
use coldchain_core::config::DeviceConfig;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failures. Reported through session status, never returned to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Discovery finished without finding {target}")]
    TargetNotFound { target: String },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Capability discovery failed: {0}")]
    Capabilities(String),

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Link dropped: {0}")]
    Disconnected(String),
}

/// A device seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: String,
    /// Advertised name, if any
    pub name: Option<String>,
}

/// Service/characteristic pair carrying telemetry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicId {
    pub service: String,
    pub characteristic: String,
}

impl CharacteristicId {
    /// Identifiers compare case-insensitively, as UUID strings do
    pub fn matches(&self, other: &CharacteristicId) -> bool {
        self.service.eq_ignore_ascii_case(&other.service)
            && self.characteristic.eq_ignore_ascii_case(&other.characteristic)
    }
}

impl From<&DeviceConfig> for CharacteristicId {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            service: config.service_uuid.clone(),
            characteristic: config.characteristic_uuid.clone(),
        }
    }
}

/// Live notification stream for one characteristic
pub struct Subscription {
    /// Encoded payloads in arrival order
    pub payloads: mpsc::UnboundedReceiver<String>,
    /// Link errors for this subscription
    pub errors: mpsc::UnboundedReceiver<TransportError>,
}

/// Discovery events; the stream ends when the source stops scanning
pub type DiscoveryStream = mpsc::UnboundedReceiver<Result<DiscoveredDevice, TransportError>>;

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn start_discovery(&self) -> Result<DiscoveryStream, TransportError>;

    /// Must be safe to call when no discovery is running
    async fn stop_discovery(&self);

    async fn connect(
        &self,
        device: &DiscoveredDevice,
    ) -> Result<Arc<dyn SourceConnection>, TransportError>;
}

#[async_trait]
pub trait SourceConnection: Send + Sync {
    fn device_id(&self) -> &str;

    async fn discover_capabilities(&self) -> Result<(), TransportError>;

    async fn subscribe(&self, target: &CharacteristicId) -> Result<Subscription, TransportError>;

    /// Must be safe to call more than once
    async fn close(&self) -> Result<(), TransportError>;
}

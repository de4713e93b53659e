//! Simulated telemetry source
//!
//! Advertises one named device among decoys and streams base64-encoded
//! `asset,temperature,humidity,status` lines on the configured
//! characteristic. Used by the agent's dry-run mode and by tests, with
//! one-shot failure injection for discovery and connect.

use crate::transport::{
    CharacteristicId, DiscoveredDevice, DiscoveryStream, SourceConnection, Subscription,
    TelemetrySource, TransportError,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use coldchain_core::config::DeviceConfig;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

const SIM_DEVICE_ID: &str = "SIM-00:11:22:33:44:55";
const SIM_ASSET_ID: &str = "ASSET-001";

/// Encode one payload line the way the sensor firmware does
pub fn encode_payload(line: &str) -> String {
    STANDARD.encode(line.as_bytes())
}

/// Counters observed by tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub discoveries_started: usize,
    pub discoveries_stopped: usize,
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub payloads_sent: usize,
}

#[derive(Default)]
struct Counters {
    discoveries_started: AtomicUsize,
    discoveries_stopped: AtomicUsize,
    connections_opened: AtomicUsize,
    connections_closed: AtomicUsize,
    payloads_sent: AtomicUsize,
}

pub struct SimulatedSource {
    name: String,
    characteristic: CharacteristicId,
    lines: Vec<String>,
    interval: Duration,
    repeat: bool,
    drop_after: Option<usize>,
    fail_discovery: AtomicBool,
    fail_connect: AtomicBool,
    counters: Arc<Counters>,
}

impl SimulatedSource {
    /// A source advertising `name` on the default service/characteristic
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            characteristic: CharacteristicId::from(&DeviceConfig::default()),
            lines: Vec::new(),
            interval: Duration::from_secs(1),
            repeat: false,
            drop_after: None,
            fail_discovery: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_characteristic(mut self, characteristic: CharacteristicId) -> Self {
        self.characteristic = characteristic;
        self
    }

    /// Stream these `(temperature, humidity)` pairs in order
    pub fn with_readings(mut self, readings: &[(f64, f64)]) -> Self {
        self.lines = readings
            .iter()
            .map(|(temperature, humidity)| {
                format!("{SIM_ASSET_ID},{temperature},{humidity},OK")
            })
            .collect();
        self
    }

    /// Random readings around 4 C / 85 %RH
    pub fn with_generated_readings(mut self, count: usize) -> Self {
        let mut rng = rand::thread_rng();
        self.lines = (0..count)
            .map(|_| {
                let temperature = 4.0 + rng.gen_range(-0.5..0.5);
                let humidity = 85.0 + rng.gen_range(-2.0..2.0);
                let status = if temperature > 4.4 { "WARN" } else { "OK" };
                format!("{SIM_ASSET_ID},{temperature:.2},{humidity:.1},{status}")
            })
            .collect();
        self
    }

    /// Stream raw lines verbatim, malformed ones included
    pub fn with_raw_lines(mut self, lines: Vec<String>) -> Self {
        self.lines = lines;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Loop the script until the connection closes
    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Report a link error after `count` payloads
    pub fn drop_link_after(mut self, count: usize) -> Self {
        self.drop_after = Some(count);
        self
    }

    pub fn fail_next_discovery(&self) {
        self.fail_discovery.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SourceStats {
        let c = &self.counters;
        SourceStats {
            discoveries_started: c.discoveries_started.load(Ordering::SeqCst),
            discoveries_stopped: c.discoveries_stopped.load(Ordering::SeqCst),
            connections_opened: c.connections_opened.load(Ordering::SeqCst),
            connections_closed: c.connections_closed.load(Ordering::SeqCst),
            payloads_sent: c.payloads_sent.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl TelemetrySource for SimulatedSource {
    async fn start_discovery(&self) -> Result<DiscoveryStream, TransportError> {
        self.counters
            .discoveries_started
            .fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();

        if self.fail_discovery.swap(false, Ordering::SeqCst) {
            let _ = tx.send(Err(TransportError::Discovery(
                "simulated adapter powered off".to_string(),
            )));
            return Ok(rx);
        }

        let _ = tx.send(Ok(DiscoveredDevice {
            id: "SIM-AA:BB:CC:DD:EE:FF".to_string(),
            name: Some("HeartRate-42".to_string()),
        }));
        let _ = tx.send(Ok(DiscoveredDevice {
            id: "SIM-12:34:56:78:9A:BC".to_string(),
            name: None,
        }));
        let _ = tx.send(Ok(DiscoveredDevice {
            id: SIM_DEVICE_ID.to_string(),
            name: Some(self.name.clone()),
        }));

        Ok(rx)
    }

    async fn stop_discovery(&self) {
        self.counters
            .discoveries_stopped
            .fetch_add(1, Ordering::SeqCst);
    }

    async fn connect(
        &self,
        device: &DiscoveredDevice,
    ) -> Result<Arc<dyn SourceConnection>, TransportError> {
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Connect(
                "simulated handshake timeout".to_string(),
            ));
        }
        if device.id != SIM_DEVICE_ID {
            return Err(TransportError::Connect(format!(
                "unknown device {}",
                device.id
            )));
        }

        self.counters
            .connections_opened
            .fetch_add(1, Ordering::SeqCst);
        debug!(device_id = %device.id, "Simulated connection opened");

        let (closed_tx, _) = watch::channel(false);
        Ok(Arc::new(SimulatedConnection {
            device_id: device.id.clone(),
            characteristic: self.characteristic.clone(),
            lines: Arc::new(self.lines.clone()),
            interval: self.interval,
            repeat: self.repeat,
            drop_after: self.drop_after,
            counters: Arc::clone(&self.counters),
            closed: AtomicBool::new(false),
            closed_tx,
        }))
    }
}

struct SimulatedConnection {
    device_id: String,
    characteristic: CharacteristicId,
    lines: Arc<Vec<String>>,
    interval: Duration,
    repeat: bool,
    drop_after: Option<usize>,
    counters: Arc<Counters>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

struct Producer {
    lines: Arc<Vec<String>>,
    interval: Duration,
    repeat: bool,
    drop_after: Option<usize>,
    counters: Arc<Counters>,
    payload_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<TransportError>,
    closed: watch::Receiver<bool>,
}

impl Producer {
    async fn run(mut self) {
        let mut sent = 0usize;

        loop {
            for line in self.lines.iter() {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = self.closed.wait_for(|closed| *closed) => return,
                }

                if self.drop_after == Some(sent) {
                    let _ = self
                        .error_tx
                        .send(TransportError::Disconnected("simulated link drop".to_string()));
                    return;
                }
                if self.payload_tx.send(encode_payload(line)).is_err() {
                    return;
                }
                sent += 1;
                self.counters.payloads_sent.fetch_add(1, Ordering::SeqCst);
            }

            if !self.repeat || self.lines.is_empty() {
                break;
            }
        }

        // Keep the stream open until the connection closes
        tokio::select! {
            _ = self.closed.wait_for(|closed| *closed) => {}
            _ = self.payload_tx.closed() => {}
        }
    }
}

#[async_trait]
impl SourceConnection for SimulatedConnection {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn discover_capabilities(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Capabilities("connection closed".to_string()));
        }
        Ok(())
    }

    async fn subscribe(&self, target: &CharacteristicId) -> Result<Subscription, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("connection closed".to_string()));
        }
        if !target.matches(&self.characteristic) {
            return Err(TransportError::Subscribe(format!(
                "characteristic {} not offered by service {}",
                target.characteristic, target.service
            )));
        }

        let (payload_tx, payloads) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();

        let producer = Producer {
            lines: Arc::clone(&self.lines),
            interval: self.interval,
            repeat: self.repeat,
            drop_after: self.drop_after,
            counters: Arc::clone(&self.counters),
            payload_tx,
            error_tx,
            closed: self.closed_tx.subscribe(),
        };
        tokio::spawn(producer.run());

        Ok(Subscription { payloads, errors })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters
                .connections_closed
                .fetch_add(1, Ordering::SeqCst);
            self.closed_tx.send_replace(true);
            debug!(device_id = %self.device_id, "Simulated connection closed");
        }
        Ok(())
    }
}

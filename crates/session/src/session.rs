//! Session State Machine
//!
//! Owns the connection lifecycle for one telemetry source:
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Receiving
//!            |            |             |
//!            v            v             v
//!        ScanError  ConnectionLost  ConnectionLost
//! ```
//!
//! `start()` and `stop()` are the only inputs. Status changes go to one
//! consumer and raw payloads to another (see [`SessionEvents`]). Transport
//! errors only ever show up as status; nothing is retried automatically.
//!
//! Every spawned task carries the generation it was started under. `stop()`
//! bumps the generation, so a stale task can no longer publish status or
//! payloads. The establish task is never aborted: a connection it opens after
//! `stop()` is closed by the task itself once it sees the new generation.

use crate::status::ConnectionStatus;
use crate::transport::{
    CharacteristicId, DiscoveredDevice, SourceConnection, Subscription, TelemetrySource,
    TransportError,
};
use coldchain_core::config::DeviceConfig;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Receiving ends of a session's two output streams
pub struct SessionEvents {
    pub status: mpsc::UnboundedReceiver<ConnectionStatus>,
    pub payloads: mpsc::UnboundedReceiver<String>,
}

struct SessionState {
    status: ConnectionStatus,
    recording: bool,
    generation: u64,
    connection: Option<Arc<dyn SourceConnection>>,
    establish_task: Option<JoinHandle<()>>,
    forward_task: Option<JoinHandle<()>>,
}

struct Shared {
    source: Arc<dyn TelemetrySource>,
    device: DeviceConfig,
    state: Mutex<SessionState>,
    /// Mirrors `SessionState::generation` for tasks waiting on a cancel
    epoch: watch::Sender<u64>,
    status_tx: mpsc::UnboundedSender<ConnectionStatus>,
    payload_tx: mpsc::UnboundedSender<String>,
}

/// Connection session to a single telemetry source
pub struct TelemetrySession {
    shared: Arc<Shared>,
}

impl TelemetrySession {
    pub fn new(source: Arc<dyn TelemetrySource>, device: DeviceConfig) -> (Self, SessionEvents) {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (payload_tx, payload_rx) = mpsc::unbounded_channel();

        let (epoch, _) = watch::channel(0);

        let shared = Arc::new(Shared {
            source,
            device,
            state: Mutex::new(SessionState {
                status: ConnectionStatus::Idle,
                recording: false,
                generation: 0,
                connection: None,
                establish_task: None,
                forward_task: None,
            }),
            epoch,
            status_tx,
            payload_tx,
        });

        (
            Self { shared },
            SessionEvents {
                status: status_rx,
                payloads: payload_rx,
            },
        )
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().await.status
    }

    pub async fn is_recording(&self) -> bool {
        self.shared.state.lock().await.recording
    }

    /// Begin (or re-attempt) scanning for the configured target.
    ///
    /// No-op while a scan, connect or subscription is already live.
    pub async fn start(&self) {
        let mut state = self.shared.state.lock().await;
        state.recording = true;

        if state.status.is_active() {
            debug!(status = %state.status, "Session already active, ignoring start");
            return;
        }

        // A previous attempt may have left a finished task handle behind
        state.establish_task = None;
        let generation = self.shared.advance(&mut state);

        self.shared.publish(&mut state, ConnectionStatus::Scanning);

        let shared = Arc::clone(&self.shared);
        state.establish_task = Some(tokio::spawn(async move {
            shared.establish(generation).await;
        }));
    }

    /// Tear the session down and return to `Idle`.
    ///
    /// Idempotent. The subscription is removed before the connection closes.
    pub async fn stop(&self) {
        let (establish_task, forward_task, connection) = {
            let mut state = self.shared.state.lock().await;
            state.recording = false;
            self.shared.advance(&mut state);
            let taken = (
                state.establish_task.take(),
                state.forward_task.take(),
                state.connection.take(),
            );
            self.shared.publish(&mut state, ConnectionStatus::Idle);
            taken
        };

        // Detached, not aborted: cancelling it between `connect` returning and
        // the connection being recorded would leak the connection
        drop(establish_task);
        if let Some(task) = forward_task {
            task.abort();
            // Wait for the subscription receivers to drop
            let _ = task.await;
        }

        self.shared.source.stop_discovery().await;

        if let Some(connection) = connection {
            info!(device_id = connection.device_id(), "Closing telemetry connection");
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Error while closing telemetry connection");
            }
        }
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.try_lock() {
            self.shared.advance(&mut state);
            state.establish_task = None;
            if let Some(task) = state.forward_task.take() {
                task.abort();
            }
        }
    }
}

impl Shared {
    /// Invalidate every task started under the current generation
    fn advance(&self, state: &mut SessionState) -> u64 {
        state.generation += 1;
        self.epoch.send_replace(state.generation);
        state.generation
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.state.lock().await.generation == generation
    }

    /// Publish a status change. Repeated statuses are not re-sent.
    fn publish(&self, state: &mut SessionState, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        info!(from = %state.status, to = %status, "Session status changed");
        state.status = status;
        if self.status_tx.send(status).is_err() {
            trace!("Status consumer dropped");
        }
    }

    /// Move to `status` if `generation` is still current
    async fn transition(&self, generation: u64, status: ConnectionStatus) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return false;
        }
        self.publish(&mut state, status);
        true
    }

    async fn establish(self: Arc<Self>, generation: u64) {
        let device = match self.scan(generation).await {
            Ok(device) => device,
            Err(e) => {
                if self.is_current(generation).await {
                    warn!(error = %e, "Discovery failed");
                    self.source.stop_discovery().await;
                    self.transition(generation, ConnectionStatus::ScanError).await;
                }
                return;
            }
        };

        // stop() already ended discovery for a stale generation
        if self.is_current(generation).await {
            self.source.stop_discovery().await;
        }

        if !self.transition(generation, ConnectionStatus::Connecting).await {
            return;
        }

        let connection = match self.source.connect(&device).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(device_id = %device.id, error = %e, "Connection failed");
                self.transition(generation, ConnectionStatus::ConnectionLost).await;
                return;
            }
        };

        // Recorded before the handshake so stop() can close it at any point
        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                drop(state);
                info!(device_id = connection.device_id(), "Session stopped during connect, closing");
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "Close of stale connection failed");
                }
                return;
            }
            state.connection = Some(Arc::clone(&connection));
        }

        if let Err(e) = Arc::clone(&self).subscribe(&connection, generation).await {
            self.lose_connection(generation, e).await;
        }
    }

    async fn scan(&self, generation: u64) -> Result<DiscoveredDevice, TransportError> {
        let target = self.device.target_name.as_str();
        info!(target, "Scanning for telemetry source");

        let mut epoch = self.epoch.subscribe();
        let mut discoveries = self.source.start_discovery().await?;
        loop {
            let event = tokio::select! {
                event = discoveries.recv() => event,
                _ = epoch.wait_for(|current| *current != generation) => {
                    return Err(TransportError::Discovery("scan cancelled".to_string()));
                }
            };
            let Some(event) = event else { break };
            let device = event?;
            if device.name.as_deref() == Some(target) {
                info!(device_id = %device.id, "Found target device");
                return Ok(device);
            }
            trace!(device_id = %device.id, name = ?device.name, "Ignoring device");
        }

        Err(TransportError::TargetNotFound {
            target: target.to_string(),
        })
    }

    async fn subscribe(
        self: Arc<Self>,
        connection: &Arc<dyn SourceConnection>,
        generation: u64,
    ) -> Result<(), TransportError> {
        connection.discover_capabilities().await?;

        let characteristic = CharacteristicId::from(&self.device);
        let subscription = connection.subscribe(&characteristic).await?;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            return Ok(());
        }

        let shared = Arc::clone(&self);
        state.forward_task = Some(tokio::spawn(async move {
            shared.forward(generation, subscription).await;
        }));
        self.publish(&mut state, ConnectionStatus::Receiving);

        Ok(())
    }

    async fn forward(self: Arc<Self>, generation: u64, mut subscription: Subscription) {
        let mut errors_open = true;

        loop {
            tokio::select! {
                payload = subscription.payloads.recv() => match payload {
                    Some(payload) => {
                        // Recording is read at delivery time, never captured earlier
                        let deliver = {
                            let state = self.state.lock().await;
                            state.recording && state.generation == generation
                        };
                        if !deliver {
                            trace!("Dropping payload outside an active recording");
                            continue;
                        }
                        if self.payload_tx.send(payload).is_err() {
                            trace!("Payload consumer dropped");
                        }
                    }
                    None => {
                        self.lose_connection(
                            generation,
                            TransportError::Disconnected("payload stream closed".to_string()),
                        )
                        .await;
                        return;
                    }
                },
                error = subscription.errors.recv(), if errors_open => match error {
                    Some(e) => {
                        self.lose_connection(generation, e).await;
                        return;
                    }
                    None => errors_open = false,
                },
            }
        }
    }

    /// Drop the current link and report `ConnectionLost`
    async fn lose_connection(&self, generation: u64, error: TransportError) {
        let connection = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            warn!(error = %error, "Telemetry link lost");
            // The forwarder may be the caller; its handle is just detached
            state.forward_task = None;
            self.publish(&mut state, ConnectionStatus::ConnectionLost);
            state.connection.take()
        };

        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                debug!(error = %e, "Close after link loss failed");
            }
        }
    }
}

//! Fixtures shared by the end-to-end tests

use coldchain_core::config::{BatchingConfig, DeviceConfig, ProofConfig};
use coldchain_core::{PickupDetails, ProofBuilder, RecordStore, SqliteRecordStore};
use coldchain_session::{SimulatedSource, TelemetrySession};
use coldchain_stream::{BatchingEngine, TripManager, TripSummary};
use coldchain_sync::{ConnectivityMonitor, SimulatedAuthority, SyncReconciler};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Readings per batch in every harness
pub const BATCH_THRESHOLD: usize = 10;

/// Gap between simulated sensor notifications
pub const SENSOR_INTERVAL: Duration = Duration::from_millis(5);

/// Unique database path under the system temp dir
pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("coldchain_test_{}.db", uuid::Uuid::new_v4()))
}

/// Remove a SQLite file together with its WAL side files
pub fn remove_db(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.clone().into_os_string();
        name.push(suffix);
        let _ = std::fs::remove_file(name);
    }
}

pub fn pickup(shipment_id: &str) -> PickupDetails {
    PickupDetails {
        shipment_id: shipment_id.to_string(),
        produce_type: "Tomatoes".to_string(),
        supplier_id: "SUP-001".to_string(),
        farmer_name: "Asha Verma".to_string(),
        pickup_location: "Nashik".to_string(),
        weight_kg: 120.0,
        notes: None,
    }
}

/// Poll `check` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// One agent's worth of wiring over a single store
pub struct Harness {
    pub store: Arc<dyn RecordStore>,
    pub authority: Arc<SimulatedAuthority>,
    pub reconciler: Arc<SyncReconciler>,
    pub trips: Arc<TripManager>,
    pub proofs: ProofBuilder,
}

impl Harness {
    /// In-memory store, instant authority
    pub fn new(online: bool) -> Self {
        let store: Arc<dyn RecordStore> =
            Arc::new(SqliteRecordStore::open_in_memory().expect("in-memory store"));
        Self::with_parts(store, Arc::new(SimulatedAuthority::new()), online, ProofConfig::default())
    }

    pub fn with_parts(
        store: Arc<dyn RecordStore>,
        authority: Arc<SimulatedAuthority>,
        online: bool,
        proof: ProofConfig,
    ) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let reconciler = Arc::new(SyncReconciler::new(
            store.clone(),
            authority.clone(),
            ConnectivityMonitor::new(online),
        ));
        let batching = BatchingConfig {
            threshold: BATCH_THRESHOLD,
            flush_partial_on_stop: true,
        };
        let engine = BatchingEngine::new(store.clone(), batching.threshold);
        let trips = Arc::new(TripManager::new(engine, &batching));
        let proofs = ProofBuilder::new(store.clone(), proof);

        Self {
            store,
            authority,
            reconciler,
            trips,
            proofs,
        }
    }

    /// Record a full trip from a simulated sensor streaming `lines`.
    ///
    /// `valid` is how many of the lines decode to readings. Returns once every
    /// reading has landed in a batch or the buffer, after the trip is stopped.
    pub async fn record_trip(&self, shipment_id: &str, lines: Vec<String>, valid: usize) -> TripSummary {
        let total = lines.len();
        let device = DeviceConfig::default();
        let source = Arc::new(
            SimulatedSource::new(device.target_name.clone())
                .with_raw_lines(lines)
                .with_interval(SENSOR_INTERVAL),
        );
        let (session, events) = TelemetrySession::new(source.clone(), device);
        let intake = self.trips.attach(events);

        let started_at = self
            .trips
            .start_trip(Some(shipment_id.to_string()))
            .await
            .expect("trip starts");
        session.start().await;

        let store = self.store.clone();
        let trips = self.trips.clone();
        let source_stats = source.clone();
        let landed = wait_until(Duration::from_secs(10), || {
            let store = store.clone();
            let trips = trips.clone();
            let sent = source_stats.stats().payloads_sent;
            async move {
                let batches = store
                    .batches_in_window(started_at, i64::MAX)
                    .map(|b| b.len())
                    .unwrap_or_default();
                sent == total
                    && batches == valid / BATCH_THRESHOLD
                    && trips.buffered_count().await == valid % BATCH_THRESHOLD
            }
        })
        .await;
        assert!(landed, "telemetry did not arrive in time");

        session.stop().await;
        let summary = self.trips.stop_trip().await.expect("trip stops");
        intake.abort();
        summary
    }
}

/// Sensor lines for `(temperature, humidity)` pairs
pub fn sensor_lines(readings: &[(f64, f64)]) -> Vec<String> {
    readings
        .iter()
        .map(|(temperature, humidity)| format!("ASSET-001,{temperature},{humidity},OK"))
        .collect()
}

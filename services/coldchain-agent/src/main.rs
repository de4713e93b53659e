//! Coldchain agent
//!
//! Binary entry point wiring the telemetry session, trip manager, proof
//! builder and sync reconciler against a local SQLite record store. The
//! sensor and the remote authority are simulated.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use coldchain_core::config::Config;
use coldchain_core::{logging, PickupDetails, ProofBuilder, RecordStore, SqliteRecordStore};
use coldchain_session::{CharacteristicId, SimulatedSource, TelemetrySession};
use coldchain_stream::{BatchingEngine, TripManager};
use coldchain_sync::{
    spawn_reconnect_sync, ConnectivityMonitor, PassOutcome, SimulatedAuthority, SyncReconciler,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const AGENT_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct VersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

/// Cold-chain custody agent.
#[derive(Parser, Debug)]
#[command(name = "coldchain-agent", version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `storage.db_path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record a simulated trip end to end: pickup, telemetry, proof, sync.
    Run(RunArgs),
    /// Print the integrity proof for a time window as JSON.
    Proof {
        #[arg(long)]
        start: i64,
        #[arg(long)]
        end: i64,
    },
    /// List recent shipment records.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run one sync pass against the simulated authority.
    Sync,
    /// Print version information as JSON.
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Shipment identifier; generated when omitted
    #[arg(long)]
    shipment: Option<String>,
    #[arg(long, default_value = "Tomatoes")]
    produce: String,
    #[arg(long, default_value = "SUP-001")]
    supplier: String,
    #[arg(long, default_value = "Unknown Farmer")]
    farmer: String,
    #[arg(long, default_value = "Farm Gate")]
    location: String,
    #[arg(long, default_value_t = 100.0)]
    weight_kg: f64,
    #[arg(long)]
    notes: Option<String>,
    /// Simulated readings to stream
    #[arg(long, default_value_t = 25)]
    readings: usize,
    /// Milliseconds between simulated readings
    #[arg(long, default_value_t = 20)]
    interval_ms: u64,
    /// Start offline and reconnect after the trip is finalized
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        let handshake = VersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: AGENT_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    logging::init(&config.logging);

    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteRecordStore::open(&config.storage.db_path)
            .with_context(|| format!("opening {}", config.storage.db_path.display()))?,
    );

    match cli.command {
        Commands::Run(args) => run_trip(&config, store, args).await,
        Commands::Proof { start, end } => print_proof(&config, store, start, end),
        Commands::History { limit } => print_history(store, limit),
        Commands::Sync => sync_once(&config, store, true).await,
        Commands::Version => Ok(()),
    }
}

fn reconciler(config: &Config, store: Arc<dyn RecordStore>, online: bool) -> Arc<SyncReconciler> {
    let authority = Arc::new(
        SimulatedAuthority::new()
            .with_latency(Duration::from_millis(config.sync.simulated_latency_ms)),
    );
    Arc::new(SyncReconciler::new(
        store,
        authority,
        ConnectivityMonitor::new(online),
    ))
}

async fn run_trip(config: &Config, store: Arc<dyn RecordStore>, args: RunArgs) -> anyhow::Result<()> {
    if args.readings == 0 {
        bail!("--readings must be at least 1");
    }

    let online = config.sync.assume_online && !args.offline;
    let reconciler = reconciler(config, store.clone(), online);
    let reconnect = spawn_reconnect_sync(reconciler.clone());

    let shipment_id = args
        .shipment
        .unwrap_or_else(|| format!("SHP-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    let pickup = PickupDetails {
        shipment_id: shipment_id.clone(),
        produce_type: args.produce,
        supplier_id: args.supplier,
        farmer_name: args.farmer,
        pickup_location: args.location,
        weight_kg: args.weight_kg,
        notes: args.notes,
    };

    let outcome = reconciler.submit_pickup(pickup).await?;
    info!(shipment_id = %shipment_id, outcome = ?outcome, "Pickup submitted");

    // Telemetry
    let interval = Duration::from_millis(args.interval_ms);
    let source = Arc::new(
        SimulatedSource::new(config.device.target_name.clone())
            .with_characteristic(CharacteristicId::from(&config.device))
            .with_generated_readings(args.readings)
            .with_interval(interval),
    );
    let engine = BatchingEngine::new(store.clone(), config.batching.threshold);
    let trips = Arc::new(TripManager::new(engine, &config.batching));
    let (session, events) = TelemetrySession::new(source.clone(), config.device.clone());
    let intake = trips.attach(events);

    trips.start_trip(Some(shipment_id.clone())).await?;
    session.start().await;

    let deadline = tokio::time::Instant::now()
        + interval * (args.readings as u32 + 50)
        + Duration::from_secs(5);
    while source.stats().payloads_sent < args.readings {
        if tokio::time::Instant::now() > deadline {
            warn!(
                sent = source.stats().payloads_sent,
                status = %session.status().await,
                "Sensor stopped short of the requested readings"
            );
            break;
        }
        tokio::time::sleep(interval).await;
    }
    // Let the last payloads drain into the trip
    tokio::time::sleep(interval * 2).await;

    session.stop().await;
    let summary = trips.stop_trip().await?;
    intake.abort();

    // Proof and completion
    let builder = ProofBuilder::new(store.clone(), config.proof.clone());
    let proof = builder.generate_trip_proof(summary.started_at, summary.ended_at)?;
    let outcome = reconciler.finalize_trip(&shipment_id, &proof).await?;

    println!("{}", serde_json::to_string_pretty(&proof)?);
    println!("finalize: {:?}", outcome);
    for entry in trips.log_entries().await {
        println!("  {entry}");
    }

    if !reconciler.connectivity().is_online() {
        info!("Simulating connectivity restore");
        reconciler.connectivity().report(true, true);
        // The reconnect task runs the pass; wait for it to settle
        let mut state = reconciler.state().subscribe();
        let settle = tokio::time::timeout(Duration::from_secs(30), async {
            let mut started = false;
            while state.changed().await.is_ok() {
                let syncing = state.borrow_and_update().syncing;
                if syncing {
                    started = true;
                } else if started {
                    break;
                }
            }
        });
        if settle.await.is_err() {
            warn!("Timed out waiting for reconnect sync");
        }
    }

    reconnect.abort();
    let snapshot = reconciler.snapshot();
    println!("sync: {}", snapshot.indicator().label());
    Ok(())
}

fn print_proof(config: &Config, store: Arc<dyn RecordStore>, start: i64, end: i64) -> anyhow::Result<()> {
    let proof = ProofBuilder::new(store, config.proof.clone()).generate_trip_proof(start, end)?;
    println!("{}", serde_json::to_string_pretty(&proof)?);
    Ok(())
}

fn print_history(store: Arc<dyn RecordStore>, limit: usize) -> anyhow::Result<()> {
    let records = store.recent_shipments(limit)?;
    if records.is_empty() {
        println!("No shipments recorded");
        return Ok(());
    }

    for record in records {
        let temps = match (record.min_temp, record.max_temp, record.avg_temp_aggregate) {
            (Some(min), Some(max), Some(avg)) => format!("{min:.1}/{avg:.2}/{max:.1} C"),
            _ => "in transit".to_string(),
        };
        println!(
            "{:<14} {:<12} {:<8} {:>8.1} kg  {}  root={}",
            record.shipment_id,
            record.produce_type,
            record.sync_status,
            record.weight_kg,
            temps,
            record.merkle_root.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn sync_once(config: &Config, store: Arc<dyn RecordStore>, online: bool) -> anyhow::Result<()> {
    let reconciler = reconciler(config, store, online);
    match reconciler.sync_pending_data().await? {
        PassOutcome::Aborted {
            synced,
            shipment_id,
            error,
        } => bail!("sync aborted at {shipment_id} after {synced} records: {error}"),
        outcome => println!("{outcome:?}"),
    }
    Ok(())
}

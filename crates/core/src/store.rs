//! Record Store - local transactional storage for batches and shipments
//!
//! The engines only see the [`RecordStore`] trait. [`SqliteRecordStore`] is the
//! production backend:
//! - SQLite with WAL mode for durability on file-backed databases
//! - Schema created on open
//! - `sensor_batches`: immutable aggregates, only `is_synced` is ever updated
//! - `shipments`: the custody outbox, keyed by a unique `shipment_id`
//!
//! # Ordering
//!
//! - `batches_in_window` returns rows by ascending `start_time`, then `id`.
//!   Merkle roots are built in this order.
//! - `pending_shipments` returns rows in creation order (`id ASC`).

use crate::types::{
    Batch, NewBatch, PickupDetails, ShipmentRecord, SyncStatus, Timestamp, TripCompletion,
};
use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
#[cfg(feature = "sqlite")]
use std::path::Path;
#[cfg(feature = "sqlite")]
use std::sync::{Mutex, MutexGuard};
#[cfg(feature = "sqlite")]
use tracing::{debug, info};

/// Errors that can occur in record store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Shipment not found: {shipment_id}")]
    ShipmentNotFound { shipment_id: String },

    #[error("Duplicate shipment ID: {shipment_id}")]
    DuplicateShipment { shipment_id: String },

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Transactional record store over the batch and shipment schemas
pub trait RecordStore: Send + Sync {
    /// Insert one immutable batch row with `synced = false`
    fn insert_batch(&self, batch: &NewBatch) -> Result<Batch>;

    /// All batches with `start >= window_start` and `end <= window_end`
    fn batches_in_window(&self, window_start: Timestamp, window_end: Timestamp)
        -> Result<Vec<Batch>>;

    /// Flag every batch inside the window as synced; returns rows touched
    fn mark_batches_synced(&self, window_start: Timestamp, window_end: Timestamp)
        -> Result<usize>;

    /// Persist a new shipment as PENDING
    fn insert_shipment(&self, details: &PickupDetails, recorded_at: Timestamp)
        -> Result<ShipmentRecord>;

    fn get_shipment(&self, shipment_id: &str) -> Result<Option<ShipmentRecord>>;

    /// Write trip aggregates, set `trip_completed` and move the record back to PENDING
    fn complete_trip(&self, shipment_id: &str, completion: &TripCompletion) -> Result<()>;

    fn mark_pickup_confirmed(&self, shipment_id: &str) -> Result<()>;

    fn set_sync_status(
        &self,
        shipment_id: &str,
        status: SyncStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Mark SYNCED only while the completion state still matches
    /// `trip_completed` and `merkle_root`.
    ///
    /// Returns `false` when a concurrent `complete_trip` changed the row.
    fn mark_synced_if_unchanged(
        &self,
        shipment_id: &str,
        trip_completed: bool,
        merkle_root: Option<&str>,
    ) -> Result<bool>;

    /// PENDING and FAILED records in creation order
    fn pending_shipments(&self) -> Result<Vec<ShipmentRecord>>;

    /// Most recently recorded shipments first
    fn recent_shipments(&self, limit: usize) -> Result<Vec<ShipmentRecord>>;
}

#[cfg(feature = "sqlite")]
const SHIPMENT_COLUMNS: &str = r#"
    id, shipment_id, produce_type, supplier_id, farmer_name, pickup_location,
    weight_kg, notes, recorded_at, trip_completed, trip_started_at, trip_ended_at,
    min_temp, max_temp, avg_temp_aggregate, min_humidity, max_humidity,
    avg_humidity_aggregate, merkle_root, sync_status, pickup_confirmed, last_error
"#;

/// SQLite-backed record store
///
/// The connection is not `Sync`, so every operation is serialized through a mutex.
#[cfg(feature = "sqlite")]
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

#[cfg(feature = "sqlite")]
impl SqliteRecordStore {
    /// Create or open a store at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening record store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Enable WAL mode for durability
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(journal_mode = %mode, "Record store journal configured");

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Volatile store, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_batches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                avg_temperature REAL NOT NULL,
                avg_humidity REAL NOT NULL,
                is_synced INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
            );

            CREATE INDEX IF NOT EXISTS idx_batches_window
                ON sensor_batches(start_time, end_time);

            CREATE TABLE IF NOT EXISTS shipments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                shipment_id TEXT NOT NULL UNIQUE,
                produce_type TEXT NOT NULL,
                supplier_id TEXT NOT NULL,
                farmer_name TEXT NOT NULL,
                pickup_location TEXT NOT NULL,
                weight_kg REAL NOT NULL,
                notes TEXT,
                recorded_at INTEGER NOT NULL,
                trip_completed INTEGER NOT NULL DEFAULT 0,
                trip_started_at INTEGER,
                trip_ended_at INTEGER,
                min_temp REAL,
                max_temp REAL,
                avg_temp_aggregate REAL,
                min_humidity REAL,
                max_humidity REAL,
                avg_humidity_aggregate REAL,
                merkle_root TEXT,
                sync_status TEXT NOT NULL DEFAULT 'PENDING',
                pickup_confirmed INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_shipments_status ON shipments(sync_status);
            "#,
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
        Ok(Batch {
            id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            avg_temperature: row.get(3)?,
            avg_humidity: row.get(4)?,
            synced: row.get(5)?,
        })
    }

    fn shipment_from_row(row: &Row<'_>) -> rusqlite::Result<ShipmentRecord> {
        let status: String = row.get(19)?;
        let sync_status = status.parse::<SyncStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(19, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(ShipmentRecord {
            id: row.get(0)?,
            shipment_id: row.get(1)?,
            produce_type: row.get(2)?,
            supplier_id: row.get(3)?,
            farmer_name: row.get(4)?,
            pickup_location: row.get(5)?,
            weight_kg: row.get(6)?,
            notes: row.get(7)?,
            recorded_at: row.get(8)?,
            trip_completed: row.get(9)?,
            trip_started_at: row.get(10)?,
            trip_ended_at: row.get(11)?,
            min_temp: row.get(12)?,
            max_temp: row.get(13)?,
            avg_temp_aggregate: row.get(14)?,
            min_humidity: row.get(15)?,
            max_humidity: row.get(16)?,
            avg_humidity_aggregate: row.get(17)?,
            merkle_root: row.get(18)?,
            sync_status,
            pickup_confirmed: row.get(20)?,
            last_error: row.get(21)?,
        })
    }

    fn not_found_if_untouched(changed: usize, shipment_id: &str) -> Result<()> {
        if changed == 0 {
            return Err(StoreError::ShipmentNotFound {
                shipment_id: shipment_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
impl RecordStore for SqliteRecordStore {
    fn insert_batch(&self, batch: &NewBatch) -> Result<Batch> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO sensor_batches (start_time, end_time, avg_temperature, avg_humidity, is_synced)
            VALUES (?1, ?2, ?3, ?4, 0)
            "#,
            params![
                batch.start_time,
                batch.end_time,
                batch.avg_temperature,
                batch.avg_humidity,
            ],
        )?;

        let id = conn.last_insert_rowid();

        debug!(
            batch_id = id,
            start_time = batch.start_time,
            end_time = batch.end_time,
            "Batch persisted"
        );

        Ok(Batch {
            id,
            start_time: batch.start_time,
            end_time: batch.end_time,
            avg_temperature: batch.avg_temperature,
            avg_humidity: batch.avg_humidity,
            synced: false,
        })
    }

    fn batches_in_window(
        &self,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<Vec<Batch>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, start_time, end_time, avg_temperature, avg_humidity, is_synced
            FROM sensor_batches
            WHERE start_time >= ?1 AND end_time <= ?2
            ORDER BY start_time ASC, id ASC
            "#,
        )?;

        let batches = stmt
            .query_map(params![window_start, window_end], Self::batch_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(batches)
    }

    fn mark_batches_synced(&self, window_start: Timestamp, window_end: Timestamp) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE sensor_batches SET is_synced = 1
            WHERE start_time >= ?1 AND end_time <= ?2 AND is_synced = 0
            "#,
            params![window_start, window_end],
        )?;
        Ok(changed)
    }

    fn insert_shipment(
        &self,
        details: &PickupDetails,
        recorded_at: Timestamp,
    ) -> Result<ShipmentRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM shipments WHERE shipment_id = ?1",
                params![details.shipment_id],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some() {
            return Err(StoreError::DuplicateShipment {
                shipment_id: details.shipment_id.clone(),
            });
        }

        tx.execute(
            r#"
            INSERT INTO shipments (
                shipment_id, produce_type, supplier_id, farmer_name, pickup_location,
                weight_kg, notes, recorded_at, sync_status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                details.shipment_id,
                details.produce_type,
                details.supplier_id,
                details.farmer_name,
                details.pickup_location,
                details.weight_kg,
                details.notes,
                recorded_at,
                SyncStatus::Pending.as_str(),
            ],
        )?;

        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(shipment_id = %details.shipment_id, id, "Shipment recorded");

        Ok(ShipmentRecord {
            id,
            shipment_id: details.shipment_id.clone(),
            produce_type: details.produce_type.clone(),
            supplier_id: details.supplier_id.clone(),
            farmer_name: details.farmer_name.clone(),
            pickup_location: details.pickup_location.clone(),
            weight_kg: details.weight_kg,
            notes: details.notes.clone(),
            recorded_at,
            trip_completed: false,
            trip_started_at: None,
            trip_ended_at: None,
            min_temp: None,
            max_temp: None,
            avg_temp_aggregate: None,
            min_humidity: None,
            max_humidity: None,
            avg_humidity_aggregate: None,
            merkle_root: None,
            sync_status: SyncStatus::Pending,
            pickup_confirmed: false,
            last_error: None,
        })
    }

    fn get_shipment(&self, shipment_id: &str) -> Result<Option<ShipmentRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE shipment_id = ?1");
        let record = conn
            .query_row(&sql, params![shipment_id], Self::shipment_from_row)
            .optional()?;
        Ok(record)
    }

    fn complete_trip(&self, shipment_id: &str, completion: &TripCompletion) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE shipments SET
                min_temp = ?2,
                max_temp = ?3,
                avg_temp_aggregate = ?4,
                min_humidity = ?5,
                max_humidity = ?6,
                avg_humidity_aggregate = ?7,
                merkle_root = ?8,
                trip_started_at = ?9,
                trip_ended_at = ?10,
                trip_completed = 1,
                sync_status = ?11
            WHERE shipment_id = ?1
            "#,
            params![
                shipment_id,
                completion.min_temp,
                completion.max_temp,
                completion.avg_temp,
                completion.min_humidity,
                completion.max_humidity,
                completion.avg_humidity,
                completion.merkle_root,
                completion.window_start,
                completion.window_end,
                SyncStatus::Pending.as_str(),
            ],
        )?;
        Self::not_found_if_untouched(changed, shipment_id)
    }

    fn mark_pickup_confirmed(&self, shipment_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE shipments SET pickup_confirmed = 1 WHERE shipment_id = ?1",
            params![shipment_id],
        )?;
        Self::not_found_if_untouched(changed, shipment_id)
    }

    fn set_sync_status(
        &self,
        shipment_id: &str,
        status: SyncStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE shipments SET sync_status = ?2, last_error = ?3 WHERE shipment_id = ?1",
            params![shipment_id, status.as_str(), last_error],
        )?;
        Self::not_found_if_untouched(changed, shipment_id)
    }

    fn mark_synced_if_unchanged(
        &self,
        shipment_id: &str,
        trip_completed: bool,
        merkle_root: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE shipments SET sync_status = ?2, last_error = NULL
            WHERE shipment_id = ?1 AND trip_completed = ?3 AND merkle_root IS ?4
            "#,
            params![
                shipment_id,
                SyncStatus::Synced.as_str(),
                trip_completed,
                merkle_root
            ],
        )?;
        if changed > 0 {
            return Ok(true);
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM shipments WHERE shipment_id = ?1)",
            params![shipment_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::ShipmentNotFound {
                shipment_id: shipment_id.to_string(),
            });
        }
        debug!(shipment_id, "Shipment changed since it was read, not marking synced");
        Ok(false)
    }

    fn pending_shipments(&self) -> Result<Vec<ShipmentRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments \
             WHERE sync_status IN ('PENDING', 'FAILED') ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], Self::shipment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn recent_shipments(&self, limit: usize) -> Result<Vec<ShipmentRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SHIPMENT_COLUMNS} FROM shipments ORDER BY id DESC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![limit as i64], Self::shipment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

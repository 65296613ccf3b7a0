//! SQLite-backed store gateway
//!
//! Records are kept flattened in `processed_agent_data`. A batch save runs in
//! a single transaction so a failed batch leaves no rows behind. The
//! connection lives behind a mutex and every call runs on the blocking pool.

use crate::domain::record::{parse_timestamp, NewRecord, ProcessedRecord};
use crate::domain::types::UserId;
use crate::error::StoreError;
use crate::services::store_gateway::StoreGateway;
use async_trait::async_trait;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const COLUMNS: &str = "id, road_state, user_id, x, y, z, latitude, longitude, timestamp";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Task(format!(
                        "failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self::with_connection(conn)?;
        info!(path = %db_path.display(), journal_mode = %journal_mode, "sqlite_store_opened");
        Ok(store)
    }

    /// Private in-memory database (tests, ephemeral runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_agent_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                road_state TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL,
                z REAL NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_user_timestamp
             ON processed_agent_data(user_id, timestamp)",
            [],
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn format_timestamp(record: &NewRecord) -> String {
    record.agent_data.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessedRecord> {
    let raw_timestamp: String = row.get(8)?;
    let timestamp = parse_timestamp(&raw_timestamp).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("invalid stored timestamp {raw_timestamp:?}").into(),
        )
    })?;

    Ok(ProcessedRecord {
        id: row.get(0)?,
        road_state: row.get(1)?,
        user_id: UserId(row.get(2)?),
        x: row.get(3)?,
        y: row.get(4)?,
        z: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        timestamp,
    })
}

#[async_trait]
impl StoreGateway for SqliteStore {
    async fn save(&self, records: &[NewRecord]) -> Result<Vec<ProcessedRecord>, StoreError> {
        let records = records.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut saved = Vec::with_capacity(records.len());
            {
                let mut insert = tx.prepare_cached(
                    "INSERT INTO processed_agent_data
                     (road_state, user_id, x, y, z, latitude, longitude, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for record in &records {
                    let data = &record.agent_data;
                    insert.execute(params![
                        record.road_state,
                        data.user_id.0,
                        data.accelerometer.x,
                        data.accelerometer.y,
                        data.accelerometer.z,
                        data.gps.latitude,
                        data.gps.longitude,
                        format_timestamp(record),
                    ])?;
                    saved.push(ProcessedRecord::from_new(tx.last_insert_rowid(), record));
                }
            }
            tx.commit()?;
            debug!(count = saved.len(), "sqlite_batch_saved");
            Ok(saved)
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<ProcessedRecord>, StoreError> {
        self.blocking(move |conn| {
            let sql = format!("SELECT {COLUMNS} FROM processed_agent_data WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], row_to_record).optional()?)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ProcessedRecord>, StoreError> {
        self.blocking(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM processed_agent_data ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_record)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn update(
        &self,
        id: i64,
        record: &NewRecord,
    ) -> Result<Option<ProcessedRecord>, StoreError> {
        let record = record.clone();
        self.blocking(move |conn| {
            let data = &record.agent_data;
            let sql = format!(
                "UPDATE processed_agent_data
                 SET road_state = ?2, user_id = ?3, x = ?4, y = ?5, z = ?6,
                     latitude = ?7, longitude = ?8, timestamp = ?9
                 WHERE id = ?1
                 RETURNING {COLUMNS}"
            );
            Ok(conn
                .query_row(
                    &sql,
                    params![
                        id,
                        record.road_state,
                        data.user_id.0,
                        data.accelerometer.x,
                        data.accelerometer.y,
                        data.accelerometer.z,
                        data.gps.latitude,
                        data.gps.longitude,
                        format_timestamp(&record),
                    ],
                    row_to_record,
                )
                .optional()?)
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<Option<ProcessedRecord>, StoreError> {
        self.blocking(move |conn| {
            let sql = format!("DELETE FROM processed_agent_data WHERE id = ?1 RETURNING {COLUMNS}");
            Ok(conn.query_row(&sql, params![id], row_to_record).optional()?)
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

//! SQLite warehouse backend

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use super::Warehouse;
use crate::error::StorageError;
use crate::record::AttributionRecord;

/// Local warehouse table with `INSERT .. ON CONFLICT(id) DO UPDATE` semantics
///
/// Writes run on the blocking thread pool.
pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
    table: Arc<str>,
}

impl SqliteWarehouse {
    /// Open or create the database at `path`, creating the table if absent.
    ///
    /// `table` must already be a validated identifier.
    pub fn open(path: impl AsRef<Path>, table: String) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::StateIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?, table)
    }

    /// Open in-memory database (for testing and dry runs)
    pub fn open_in_memory(table: String) -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?, table)
    }

    fn init(conn: Connection, table: String) -> Result<Self, StorageError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id          TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                entity      TEXT NOT NULL,
                value       REAL NOT NULL,
                tags        TEXT NOT NULL,
                address     TEXT,
                custodian   TEXT,
                sanctioned  INTEGER NOT NULL,
                loaded_at   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {table}_occurred_at ON {table}(occurred_at);"
        ))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.into(),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }

    /// Number of rows currently in the table.
    pub fn row_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Stored `(id, value)` pairs ordered by id.
    pub fn values(&self) -> Result<Vec<(String, f64)>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT id, value FROM {} ORDER BY id", self.table))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert(&self, records: &[AttributionRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = Arc::clone(&self.conn);
        let table = Arc::clone(&self.table);
        let records = records.to_vec();
        let written = tokio::task::spawn_blocking(move || write_batch(&conn, &table, &records))
            .await
            .map_err(|e| StorageError::Request(format!("sqlite writer task failed: {e}")))??;

        debug!(table = %self.table, rows = written, "sqlite upsert committed");
        Ok(written)
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|e| e.into_inner())
}

/// Upsert `records` inside a single transaction.
fn write_batch(
    conn: &Mutex<Connection>,
    table: &str,
    records: &[AttributionRecord],
) -> Result<usize, StorageError> {
    let loaded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let mut conn = lock(conn);
    let tx = conn.transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {table} (id, occurred_at, entity, value, tags, address, custodian, sanctioned, loaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                occurred_at = excluded.occurred_at,
                entity      = excluded.entity,
                value       = excluded.value,
                tags        = excluded.tags,
                address     = excluded.address,
                custodian   = excluded.custodian,
                sanctioned  = excluded.sanctioned,
                loaded_at   = excluded.loaded_at"
        ))?;
        for record in records {
            let tags = serde_json::to_string(&record.tags)?;
            written += stmt.execute(params![
                record.id,
                record
                    .occurred_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
                record.entity,
                record.value,
                tags,
                record.address,
                record.custodian,
                record.sanctioned,
                loaded_at,
            ])?;
        }
    }
    tx.commit()?;
    Ok(written)
}

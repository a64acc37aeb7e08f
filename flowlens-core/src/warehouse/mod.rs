//! Warehouse sink.
//!
//! Every backend upserts keyed on [`AttributionRecord::id`], so writing the
//! same records twice leaves the table unchanged. Backends are picked from the
//! `GBQ_URI` scheme:
//!
//! | URI | backend |
//! |-----|---------|
//! | `bigquery://<project>/<dataset>/<table>` | [`BigQueryWarehouse`] |
//! | `sqlite://<path>[?table=<name>]` | [`SqliteWarehouse`] |
//! | `sqlite::memory:` | [`SqliteWarehouse`] in memory |

mod bigquery;
mod memory;
mod sqlite;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;

pub use bigquery::{BigQueryWarehouse, DEFAULT_BIGQUERY_ENDPOINT};
pub use memory::MemoryWarehouse;
pub use sqlite::SqliteWarehouse;

use crate::config::WarehouseConfig;
use crate::error::StorageError;
use crate::record::AttributionRecord;

/// Table used when the URI does not name one
pub const DEFAULT_TABLE: &str = "attributions";

/// Destination for fetched records.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Insert or update `records`, returning the number of rows written.
    async fn upsert(&self, records: &[AttributionRecord]) -> Result<usize, StorageError>;
}

/// Parsed `GBQ_URI`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseTarget {
    BigQuery {
        project: String,
        dataset: String,
        table: String,
    },
    Sqlite {
        path: PathBuf,
        table: String,
    },
    SqliteMemory,
}

impl FromStr for WarehouseTarget {
    type Err = String;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let uri = uri.trim();
        if uri == "sqlite::memory:" {
            return Ok(WarehouseTarget::SqliteMemory);
        }
        if let Some(rest) = uri.strip_prefix("sqlite://") {
            let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
            if path.is_empty() {
                return Err("sqlite URI has no database path".to_string());
            }
            let table = url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "table")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_else(|| DEFAULT_TABLE.to_string());
            validate_identifier(&table)?;
            return Ok(WarehouseTarget::Sqlite {
                path: PathBuf::from(path),
                table,
            });
        }
        if uri.starts_with("bigquery://") {
            let parsed = url::Url::parse(uri).map_err(|e| format!("malformed URI: {e}"))?;
            let project = parsed.host_str().unwrap_or_default().to_string();
            let segments: Vec<&str> = parsed
                .path_segments()
                .map(|s| s.filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();
            let [dataset, table] = segments.as_slice() else {
                return Err("expected bigquery://<project>/<dataset>/<table>".to_string());
            };
            if project.is_empty() {
                return Err("bigquery URI has no project".to_string());
            }
            validate_identifier(dataset)?;
            validate_identifier(table)?;
            return Ok(WarehouseTarget::BigQuery {
                project,
                dataset: dataset.to_string(),
                table: table.to_string(),
            });
        }
        Err(format!(
            "unsupported warehouse URI '{uri}' (expected bigquery:// or sqlite://)"
        ))
    }
}

impl fmt::Display for WarehouseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarehouseTarget::BigQuery {
                project,
                dataset,
                table,
            } => write!(f, "bigquery://{project}/{dataset}/{table}"),
            WarehouseTarget::Sqlite { path, table } => {
                write!(f, "sqlite://{}?table={table}", path.display())
            }
            WarehouseTarget::SqliteMemory => write!(f, "sqlite::memory:"),
        }
    }
}

/// Table and dataset names are interpolated into SQL.
fn validate_identifier(name: &str) -> Result<(), String> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(format!("'{name}' is not a valid table identifier"))
    }
}

/// Open the warehouse named by `config`.
pub fn open(config: &WarehouseConfig) -> Result<Box<dyn Warehouse>, StorageError> {
    match &config.target {
        WarehouseTarget::BigQuery {
            project,
            dataset,
            table,
        } => {
            let token = config.access_token.clone().ok_or_else(|| {
                StorageError::Request("BigQuery target needs an access token".to_string())
            })?;
            Ok(Box::new(BigQueryWarehouse::new(
                project.clone(),
                dataset.clone(),
                table.clone(),
                token,
            )?))
        }
        WarehouseTarget::Sqlite { path, table } => {
            Ok(Box::new(SqliteWarehouse::open(path, table.clone())?))
        }
        WarehouseTarget::SqliteMemory => Ok(Box::new(SqliteWarehouse::open_in_memory(
            DEFAULT_TABLE.to_string(),
        )?)),
    }
}

//! In-memory warehouse for tests and dry runs

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::Warehouse;
use crate::error::StorageError;
use crate::record::AttributionRecord;

/// Keyed map of records. Optionally fails every write.
#[derive(Default)]
pub struct MemoryWarehouse {
    rows: Mutex<BTreeMap<String, AttributionRecord>>,
    failure: Option<String>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A warehouse whose every upsert is rejected with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            rows: Mutex::default(),
            failure: Some(message.into()),
        }
    }

    /// Stored rows ordered by id.
    pub fn rows(&self) -> Vec<AttributionRecord> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, records: &[AttributionRecord]) -> Result<usize, StorageError> {
        if let Some(message) = &self.failure {
            return Err(StorageError::Request(message.clone()));
        }
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            rows.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }
}

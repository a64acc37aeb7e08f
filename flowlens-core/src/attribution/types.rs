//! Attribution API wire types.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{AddressAttribution, AttributionRecord, OfacStatus};

/// Largest address batch the API accepts in one lookup.
pub const MAX_LOOKUP_ADDRESSES: usize = 10_000;

/// One record as returned by `GET /attributions`.
#[derive(Debug, Deserialize)]
pub struct ApiRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub entity: String,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub custodian: Option<String>,
    #[serde(default)]
    pub is_ofac_sanctioned: Option<OfacStatus>,
}

impl From<ApiRecord> for AttributionRecord {
    fn from(record: ApiRecord) -> Self {
        Self {
            id: record.id,
            occurred_at: record.timestamp,
            entity: record.entity,
            value: record.value,
            tags: record.tags,
            address: record.address,
            custodian: record.custodian,
            sanctioned: record.is_ofac_sanctioned == Some(OfacStatus::Sanctioned),
        }
    }
}

/// Response page from `GET /attributions`.
#[derive(Debug, Deserialize)]
pub struct ApiPage {
    #[serde(default)]
    pub data: Vec<ApiRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One page of records plus the cursor for the following page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPage {
    pub records: Vec<AttributionRecord>,
    /// `None` when this is the last page.
    pub next_cursor: Option<String>,
}

impl From<ApiPage> for RecordPage {
    fn from(page: ApiPage) -> Self {
        Self {
            records: page.data.into_iter().map(AttributionRecord::from).collect(),
            next_cursor: page.next_cursor.filter(|c| !c.is_empty()),
        }
    }
}

/// Request body for `POST /address-attributions`.
#[derive(Debug, Serialize)]
pub struct AddressAttributionsRequest<'a> {
    pub addresses: &'a [String],
}

/// Response from `POST /address-attributions`, keyed by address.
#[derive(Debug, Default, Deserialize)]
pub struct AddressAttributionsResponse {
    #[serde(default)]
    pub data: HashMap<String, AddressAttribution>,
}

/// Error body the API sends with non-2xx answers.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// Best-effort message extraction from an error response body.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody { message: Some(m) }) => m,
        _ if body.trim().is_empty() => "Unknown error".to_string(),
        _ => body.trim().to_string(),
    }
}

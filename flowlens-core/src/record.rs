//! Attribution data as it flows through the pipeline.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of attribution data returned by the attribution API.
///
/// Immutable once fetched; the warehouse row is the durable copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    /// Unique per source event; the warehouse upsert key.
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    /// Attributed entity (exchange, custodian, OTC desk, ...).
    pub entity: String,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custodian: Option<String>,
    /// Entity is on the OFAC sanctions list.
    #[serde(default)]
    pub sanctioned: bool,
}

impl AttributionRecord {
    /// Create a record with no tags or wallet details.
    pub fn new(
        id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        entity: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            id: id.into(),
            occurred_at,
            entity: entity.into(),
            value,
            tags: BTreeSet::new(),
            address: None,
            custodian: None,
            sanctioned: false,
        }
    }

    /// Add a source/category tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn sanctioned(mut self) -> Self {
        self.sanctioned = true;
        self
    }
}

/// OFAC sanction status as reported by the attribution API (`0` or `1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum OfacStatus {
    NotSanctioned,
    Sanctioned,
}

impl From<u8> for OfacStatus {
    fn from(value: u8) -> Self {
        if value == 0 {
            OfacStatus::NotSanctioned
        } else {
            OfacStatus::Sanctioned
        }
    }
}

impl From<OfacStatus> for u8 {
    fn from(status: OfacStatus) -> Self {
        match status {
            OfacStatus::NotSanctioned => 0,
            OfacStatus::Sanctioned => 1,
        }
    }
}

/// Attribution details for a single wallet address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressAttribution {
    /// Ultimate beneficial owner of the wallet.
    #[serde(default)]
    pub beneficial_owner: Option<String>,
    /// Custodian holding the assets, if any.
    #[serde(default)]
    pub custodian: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub is_ofac_sanctioned: Option<OfacStatus>,
    /// Specially Designated Nationals list name, when sanctioned.
    #[serde(default)]
    pub sdn_name: Option<String>,
    #[serde(default)]
    pub wallet_id: Option<String>,
}

impl AddressAttribution {
    pub fn is_sanctioned(&self) -> bool {
        self.is_ofac_sanctioned == Some(OfacStatus::Sanctioned)
    }
}

//! BigQuery warehouse backend.
//!
//! Writes go through the `jobs.query` REST method as a parameterized `MERGE`
//! over `UNNEST(@rows)`. The rows travel as one `ARRAY<STRUCT<..>>` query
//! parameter, so no record value is ever spliced into SQL text.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use flowlens_models::ApiKey;

use super::Warehouse;
use crate::error::StorageError;
use crate::record::AttributionRecord;

pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Rows per MERGE statement
const CHUNK_SIZE: usize = 500;
/// Server-side wait per `jobs.query` / `getQueryResults` call
const SERVER_WAIT_MS: u64 = 10_000;
const MAX_POLLS: u32 = 30;

/// Column name and BigQuery type, in table order
const COLUMNS: &[(&str, &str)] = &[
    ("id", "STRING"),
    ("occurred_at", "TIMESTAMP"),
    ("entity", "STRING"),
    ("value", "FLOAT64"),
    ("tags", "ARRAY<STRING>"),
    ("address", "STRING"),
    ("custodian", "STRING"),
    ("sanctioned", "BOOL"),
];

pub struct BigQueryWarehouse {
    endpoint: String,
    project: String,
    dataset: String,
    table: String,
    token: ApiKey,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl BigQueryWarehouse {
    pub fn new(
        project: String,
        dataset: String,
        table: String,
        token: ApiKey,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(SERVER_WAIT_MS) + Duration::from_secs(50))
            .build()
            .map_err(|e| StorageError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: DEFAULT_BIGQUERY_ENDPOINT.to_string(),
            project,
            dataset,
            table,
            token,
            poll_interval: Duration::from_secs(1),
            client,
        })
    }

    /// Point at a different REST endpoint (emulators, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn merge_statement(&self) -> String {
        let target = format!("`{}.{}.{}`", self.project, self.dataset, self.table);
        let names: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
        let updates = names
            .iter()
            .filter(|name| **name != "id")
            .map(|name| format!("{name} = S.{name}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sources = names
            .iter()
            .map(|name| format!("S.{name}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "MERGE {target} T \
             USING (SELECT * FROM UNNEST(@rows)) S \
             ON T.id = S.id \
             WHEN MATCHED THEN UPDATE SET {updates}, loaded_at = CURRENT_TIMESTAMP() \
             WHEN NOT MATCHED THEN INSERT ({}, loaded_at) VALUES ({sources}, CURRENT_TIMESTAMP())",
            names.join(", ")
        )
    }

    async fn merge_chunk(&self, rows: &[&AttributionRecord]) -> Result<usize, StorageError> {
        let url = format!("{}/projects/{}/queries", self.endpoint, self.project);
        let body = QueryRequest {
            query: self.merge_statement(),
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: vec![rows_parameter(rows)],
            timeout_ms: SERVER_WAIT_MS,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        let mut result: QueryResponse = read_response(response).await?;

        let mut polls = 0;
        while !result.job_complete {
            polls += 1;
            let job = result.job_reference.clone().ok_or_else(|| {
                StorageError::Incomplete("incomplete job without a job reference".to_string())
            })?;
            if polls > MAX_POLLS {
                return Err(StorageError::Incomplete(job.job_id));
            }
            debug!(job_id = %job.job_id, polls, "waiting for BigQuery job");
            tokio::time::sleep(self.poll_interval).await;
            result = self.poll(&job).await?;
        }

        if let Some(error) = result.errors.into_iter().next() {
            return Err(StorageError::Rejected {
                status: 200,
                message: error.message,
            });
        }

        result
            .num_dml_affected_rows
            .as_deref()
            .unwrap_or("0")
            .parse::<usize>()
            .map_err(|e| StorageError::Request(format!("bad numDmlAffectedRows: {e}")))
    }

    async fn poll(&self, job: &JobReference) -> Result<QueryResponse, StorageError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.endpoint, self.project, job.job_id
        );
        let mut query = vec![("timeoutMs", SERVER_WAIT_MS.to_string())];
        if let Some(location) = &job.location {
            query.push(("location", location.clone()));
        }
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.token.expose_secret())
            .query(&query)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        read_response(response).await
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn name(&self) -> &str {
        "bigquery"
    }

    async fn upsert(&self, records: &[AttributionRecord]) -> Result<usize, StorageError> {
        // MERGE rejects a source with two rows for the same key; last one wins.
        let mut latest: HashMap<&str, &AttributionRecord> = HashMap::new();
        let mut order = Vec::new();
        for record in records {
            if latest.insert(record.id.as_str(), record).is_none() {
                order.push(record.id.as_str());
            }
        }
        let rows: Vec<&AttributionRecord> = order.iter().filter_map(|id| latest.get(id).copied()).collect();

        let mut written = 0;
        for chunk in rows.chunks(CHUNK_SIZE) {
            written += self.merge_chunk(chunk).await?;
        }
        info!(
            table = %format!("{}.{}.{}", self.project, self.dataset, self.table),
            rows = written,
            "BigQuery merge finished"
        );
        Ok(written)
    }
}

async fn read_response(response: reqwest::Response) -> Result<QueryResponse, StorageError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| StorageError::Request(e.to_string()))?;
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);
        return Err(StorageError::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    Ok(serde_json::from_str(&text)?)
}

fn timestamp_value(record: &AttributionRecord) -> String {
    record
        .occurred_at
        .format("%Y-%m-%d %H:%M:%S%.6f+00:00")
        .to_string()
}

fn rows_parameter(rows: &[&AttributionRecord]) -> QueryParameter {
    let struct_types = COLUMNS
        .iter()
        .map(|(name, ty)| StructField {
            name: name.to_string(),
            field_type: parameter_type(ty),
        })
        .collect();

    let array_values = rows
        .iter()
        .map(|record| {
            let mut fields = BTreeMap::new();
            fields.insert("id", ParameterValue::scalar(record.id.clone()));
            fields.insert("occurred_at", ParameterValue::scalar(timestamp_value(record)));
            fields.insert("entity", ParameterValue::scalar(record.entity.clone()));
            fields.insert("value", ParameterValue::scalar(record.value.to_string()));
            fields.insert(
                "tags",
                ParameterValue::array(record.tags.iter().cloned().map(ParameterValue::scalar)),
            );
            fields.insert("address", ParameterValue::nullable(record.address.clone()));
            fields.insert("custodian", ParameterValue::nullable(record.custodian.clone()));
            fields.insert("sanctioned", ParameterValue::scalar(record.sanctioned.to_string()));
            ParameterValue {
                struct_values: Some(fields),
                ..ParameterValue::default()
            }
        })
        .collect::<Vec<_>>();

    QueryParameter {
        name: "rows".to_string(),
        parameter_type: ParameterType {
            kind: "ARRAY".to_string(),
            array_type: Some(Box::new(ParameterType {
                kind: "STRUCT".to_string(),
                array_type: None,
                struct_types: Some(struct_types),
            })),
            struct_types: None,
        },
        parameter_value: ParameterValue {
            array_values: Some(array_values),
            ..ParameterValue::default()
        },
    }
}

fn parameter_type(ty: &str) -> ParameterType {
    match ty.strip_prefix("ARRAY<").and_then(|t| t.strip_suffix('>')) {
        Some(inner) => ParameterType {
            kind: "ARRAY".to_string(),
            array_type: Some(Box::new(parameter_type(inner))),
            struct_types: None,
        },
        None => ParameterType {
            kind: ty.to_string(),
            array_type: None,
            struct_types: None,
        },
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<QueryParameter>,
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter {
    name: String,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterType {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_type: Option<Box<ParameterType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    struct_types: Option<Vec<StructField>>,
}

#[derive(Debug, Serialize)]
struct StructField {
    name: String,
    #[serde(rename = "type")]
    field_type: ParameterType,
}

/// A missing `value` is SQL NULL.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_values: Option<Vec<ParameterValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    struct_values: Option<BTreeMap<&'static str, ParameterValue>>,
}

impl ParameterValue {
    fn scalar(value: String) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    fn nullable(value: Option<String>) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    fn array(values: impl Iterator<Item = ParameterValue>) -> Self {
        Self {
            array_values: Some(values.collect()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

//! Attribution API client
//!
//! [`AttributionClient`] talks to the attribution API over HTTPS with an
//! `X-API-Key` header. Window queries are paginated with an opaque cursor and
//! exposed as a lazy, restartable [`RecordPages`] sequence.
//!
//! Transient failures (429, 5xx, no response) are retried in place with
//! [`RetryPolicy`]; the same cursor is requested again, so a retry neither
//! skips nor repeats a page. Client errors end the run immediately.

mod retry;
mod types;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use flowlens_models::ApiKey;

pub use retry::RetryPolicy;
pub use types::{MAX_LOOKUP_ADDRESSES, RecordPage};

use crate::config::AttributionConfig;
use crate::error::FetchError;
use crate::record::{AddressAttribution, AttributionRecord};
use crate::window::QueryWindow;
use types::{AddressAttributionsRequest, AddressAttributionsResponse, ApiPage, error_message};

/// Default attribution API base URL.
pub const DEFAULT_ATTRIBUTION_BASE_URL: &str = "https://attribution-api.elementus.io";

/// A paginated source of attribution records.
///
/// Implemented by [`AttributionClient`]; tests substitute in-memory sources.
#[async_trait]
pub trait AttributionSource: Send + Sync {
    /// Fetch the page at `cursor` (`None` for the first page) for `window`.
    async fn fetch_page(
        &self,
        window: &QueryWindow,
        cursor: Option<&str>,
    ) -> Result<RecordPage, FetchError>;
}

/// Lazy, finite sequence of record pages for one window.
///
/// A failed [`next_page`](Self::next_page) leaves the cursor where it was, so
/// the caller may call it again, or persist [`cursor`](Self::cursor) and
/// [`resume`](Self::resume) later.
pub struct RecordPages<'a> {
    source: &'a dyn AttributionSource,
    window: QueryWindow,
    cursor: Option<String>,
    /// Every cursor handed out so far; a repeat means the API is cycling.
    seen: HashSet<String>,
    finished: bool,
    pages: usize,
}

impl<'a> RecordPages<'a> {
    pub fn new(source: &'a dyn AttributionSource, window: QueryWindow) -> Self {
        Self {
            source,
            window,
            cursor: None,
            seen: HashSet::new(),
            finished: false,
            pages: 0,
        }
    }

    /// Continue a sequence from a previously observed cursor.
    pub fn resume(source: &'a dyn AttributionSource, window: QueryWindow, cursor: String) -> Self {
        Self {
            seen: HashSet::from([cursor.clone()]),
            cursor: Some(cursor),
            ..Self::new(source, window)
        }
    }

    /// Cursor of the next page to fetch.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Fetch the next page, or `None` once the sequence is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<AttributionRecord>>, FetchError> {
        if self.finished {
            return Ok(None);
        }

        let page = self
            .source
            .fetch_page(&self.window, self.cursor.as_deref())
            .await?;

        if let Some(next) = &page.next_cursor
            && !self.seen.insert(next.clone())
        {
            return Err(FetchError::Decode(format!(
                "pagination cursor {next:?} was already visited"
            )));
        }

        self.pages += 1;
        self.finished = page.next_cursor.is_none();
        self.cursor = page.next_cursor;

        let total = page.records.len();
        let records: Vec<_> = page
            .records
            .into_iter()
            .filter(|r| self.window.contains(r.occurred_at))
            .collect();
        if records.len() < total {
            warn!(
                dropped = total - records.len(),
                window = %self.window,
                "attribution API returned records outside the window"
            );
        }

        debug!(page = self.pages, records = records.len(), "fetched attribution page");
        Ok(Some(records))
    }

    /// Drain the sequence, keeping one record per id (the latest seen).
    pub async fn collect_all(mut self) -> Result<Vec<AttributionRecord>, FetchError> {
        let mut records: Vec<AttributionRecord> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        while let Some(page) = self.next_page().await? {
            for record in page {
                match positions.get(&record.id) {
                    Some(&i) => records[i] = record,
                    None => {
                        positions.insert(record.id.clone(), records.len());
                        records.push(record);
                    }
                }
            }
        }

        info!(
            pages = self.pages,
            records = records.len(),
            window = %self.window,
            "fetched attribution window"
        );
        Ok(records)
    }
}

/// A request that failed, with the server's requested pause if it sent one.
struct FailedAttempt {
    error: FetchError,
    retry_after: Option<Duration>,
}

/// HTTP client for the attribution API.
pub struct AttributionClient {
    base_url: String,
    api_key: ApiKey,
    page_size: u32,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl AttributionClient {
    pub fn new(config: &AttributionConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            page_size: config.page_size,
            retry: config.retry.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lazy page sequence for `window`.
    pub fn fetch(&self, window: QueryWindow) -> RecordPages<'_> {
        RecordPages::new(self, window)
    }

    /// Restart a page sequence from `cursor`.
    pub fn resume(&self, window: QueryWindow, cursor: String) -> RecordPages<'_> {
        RecordPages::resume(self, window, cursor)
    }

    /// Probe `GET /health`; any 2xx counts as healthy.
    pub async fn check_health(&self) -> Result<(), FetchError> {
        let url = format!("{}/health", self.base_url);
        self.execute(|| self.client.get(&url)).await?;
        Ok(())
    }

    /// Attribution details for a batch of wallet addresses.
    pub async fn address_attributions(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, AddressAttribution>, FetchError> {
        if addresses.is_empty() {
            return Err(FetchError::InvalidRequest(
                "at least one address is required".to_string(),
            ));
        }
        if addresses.len() > MAX_LOOKUP_ADDRESSES {
            return Err(FetchError::InvalidRequest(format!(
                "{} addresses exceeds the limit of {}",
                addresses.len(),
                MAX_LOOKUP_ADDRESSES
            )));
        }

        let url = format!("{}/address-attributions", self.base_url);
        let body = AddressAttributionsRequest { addresses };
        let response: AddressAttributionsResponse = self
            .execute_json(|| self.client.post(&url).json(&body))
            .await?;
        Ok(response.data)
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, FetchError> {
        let body = self.execute(build).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Send a request, retrying transient failures per the retry policy.
    async fn execute(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<String, FetchError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let failed = match self.attempt(build()).await {
                Ok(body) => return Ok(body),
                Err(failed) => failed,
            };

            if !failed.error.is_retryable() {
                return Err(failed.error);
            }
            if !self.retry.allows_another(attempts) {
                return Err(FetchError::RetriesExhausted {
                    attempts,
                    last: Box::new(failed.error),
                });
            }

            let delay = self.retry.delay_for(attempts, failed.retry_after);
            warn!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failed.error,
                "attribution request failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, request: reqwest::RequestBuilder) -> Result<String, FailedAttempt> {
        let response = request
            .header("X-API-Key", self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| FailedAttempt {
                error: FetchError::Upstream {
                    status: None,
                    message: e.to_string(),
                },
                retry_after: None,
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.map_err(|e| FailedAttempt {
            error: FetchError::Upstream {
                status: Some(status.as_u16()),
                message: e.to_string(),
            },
            retry_after: None,
        })?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(FailedAttempt {
                error: FetchError::from_status(status.as_u16(), error_message(&body)),
                retry_after,
            })
        }
    }
}

#[async_trait]
impl AttributionSource for AttributionClient {
    async fn fetch_page(
        &self,
        window: &QueryWindow,
        cursor: Option<&str>,
    ) -> Result<RecordPage, FetchError> {
        let url = format!("{}/attributions", self.base_url);
        let mut query = vec![
            ("start", window.start().to_rfc3339()),
            ("end", window.end().to_rfc3339()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let page: ApiPage = self
            .execute_json(|| self.client.get(&url).query(&query))
            .await?;
        Ok(page.into())
    }
}

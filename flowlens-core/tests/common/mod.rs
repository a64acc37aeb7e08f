//! Shared test utilities for flowlens-core integration tests

use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use flowlens_core::{
    AttributionRecord, AttributionSource, FetchError, NotificationError, NotificationMessage,
    Notifier, QueryWindow, RecordPage,
};
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral local port
#[allow(dead_code)]
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// 2024-03-01 at `hour:minute` UTC
#[allow(dead_code)]
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

#[allow(dead_code)]
pub fn record(id: &str, occurred_at: DateTime<Utc>, value: f64) -> AttributionRecord {
    AttributionRecord::new(id, occurred_at, "Binance", value).with_tag("exchange")
}

/// `count` records spaced `step_minutes` apart starting at `start`
#[allow(dead_code)]
pub fn records_every(start: DateTime<Utc>, step_minutes: i64, count: usize) -> Vec<AttributionRecord> {
    (0..count)
        .map(|i| {
            record(
                &format!("tx-{i:03}"),
                start + Duration::minutes(step_minutes * i as i64),
                1.0 + i as f64,
            )
        })
        .collect()
}

/// In-memory attribution API: answers each window with the records inside
/// it, `page_size` at a time, using the record offset as cursor.
#[allow(dead_code)]
pub struct VecSource {
    records: Vec<AttributionRecord>,
    page_size: usize,
    failure: Option<fn() -> FetchError>,
    calls: Mutex<usize>,
}

#[allow(dead_code)]
impl VecSource {
    pub fn new(records: Vec<AttributionRecord>, page_size: usize) -> Self {
        Self {
            records,
            page_size,
            failure: None,
            calls: Mutex::new(0),
        }
    }

    pub fn failing(failure: fn() -> FetchError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new(Vec::new(), 10)
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl AttributionSource for VecSource {
    async fn fetch_page(
        &self,
        window: &QueryWindow,
        cursor: Option<&str>,
    ) -> Result<RecordPage, FetchError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(failure) = self.failure {
            return Err(failure());
        }

        let in_window: Vec<&AttributionRecord> = self
            .records
            .iter()
            .filter(|r| window.contains(r.occurred_at))
            .collect();
        let offset: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (offset + self.page_size).min(in_window.len());
        Ok(RecordPage {
            records: in_window[offset..end].iter().map(|r| (*r).clone()).collect(),
            next_cursor: (end < in_window.len()).then(|| end.to_string()),
        })
    }
}

/// Notifier that records messages, or fails every send.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<NotificationMessage>>,
    pub fail: bool,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<NotificationMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &str {
        "@test-channel"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        if self.fail {
            return Err(NotificationError::Rejected {
                status: 400,
                description: "Bad Request: chat not found".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

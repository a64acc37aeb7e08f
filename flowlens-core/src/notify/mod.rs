//! Channel notifications.
//!
//! A run posts at most one message. Delivery failures are reported back to
//! the orchestrator as [`NotificationError`] and never abort the run.

mod telegram;

use std::collections::BTreeSet;

use async_trait::async_trait;

pub use telegram::{DEFAULT_TELEGRAM_API_URL, MAX_MESSAGE_CHARS, TelegramNotifier};

use crate::error::NotificationError;
use crate::record::AttributionRecord;
use crate::window::QueryWindow;

/// A rendered message addressed to one channel
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub text: String,
    pub channel_id: String,
    pub correlation_id: Option<String>,
}

impl NotificationMessage {
    pub fn new(text: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel_id: channel_id.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel this notifier posts to
    fn channel(&self) -> &str;

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError>;
}

/// Prints messages to stdout instead of posting them.
pub struct ConsoleNotifier {
    channel: String,
}

impl ConsoleNotifier {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        println!("--- notification for {} ---", message.channel_id);
        println!("{}", message.text);
        println!("---");
        Ok(())
    }
}

/// Aggregate figures shown in the message header
#[derive(Debug, Clone, PartialEq)]
pub struct WindowDigest {
    pub records: usize,
    pub total_value: f64,
    pub entities: usize,
    pub sanctioned_entities: usize,
}

impl WindowDigest {
    pub fn of(records: &[AttributionRecord]) -> Self {
        let entities: BTreeSet<&str> = records.iter().map(|r| r.entity.as_str()).collect();
        let sanctioned: BTreeSet<&str> = records
            .iter()
            .filter(|r| r.sanctioned)
            .map(|r| r.entity.as_str())
            .collect();
        Self {
            records: records.len(),
            total_value: records.iter().map(|r| r.value).sum(),
            entities: entities.len(),
            sanctioned_entities: sanctioned.len(),
        }
    }
}

fn window_line(window: &QueryWindow) -> String {
    format!(
        "*Window:* {} to {} UTC",
        window.start().format("%Y-%m-%d %H:%M"),
        window.end().format("%Y-%m-%d %H:%M")
    )
}

/// Message for a window with records, followed by the summary when present.
pub fn render_report(
    window: &QueryWindow,
    records: &[AttributionRecord],
    summary: Option<&str>,
) -> String {
    let digest = WindowDigest::of(records);
    let mut text = format!(
        "{}\n*Records:* {}\n*Total value:* {:.2}\n*Entities:* {}\n*Sanctioned entities:* {}\n",
        window_line(window),
        digest.records,
        digest.total_value,
        digest.entities,
        digest.sanctioned_entities,
    );
    if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        text.push('\n');
        text.push_str(summary);
        text.push('\n');
    }
    truncate_message(&text)
}

/// Message for a window without records.
pub fn render_empty(window: &QueryWindow) -> String {
    format!(
        "{}\nNo attribution activity in this window.\n",
        window_line(window)
    )
}

/// Cut `text` to the channel limit on a character boundary.
pub fn truncate_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

//! Telegram Bot API notifier

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use flowlens_models::ApiKey;

use super::{NotificationMessage, Notifier, truncate_message};
use crate::config::NotifierConfig;
use crate::error::NotificationError;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram rejects longer message texts
pub const MAX_MESSAGE_CHARS: usize = 4096;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Posts to a channel through `sendMessage`. One attempt per call.
pub struct TelegramNotifier {
    api_url: String,
    token: ApiKey,
    channel_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotificationError::Client(e.to_string()))?;
        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            channel_id: config.channel_id.clone(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> &str {
        &self.channel_id
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_url,
            self.token.expose_secret()
        );
        let text = truncate_message(&message.text);
        let body = SendMessageRequest {
            chat_id: &message.channel_id,
            text: &text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        debug!(
            channel = %message.channel_id,
            correlation_id = ?message.correlation_id,
            chars = text.chars().count(),
            "posting Telegram message"
        );

        // The URL embeds the bot token; keep it out of error text.
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NotificationError::SendFailed(e.without_url().to_string()))?;
        let parsed = serde_json::from_str::<ApiResponse>(&text).ok();

        match parsed {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => {
                info!(channel = %message.channel_id, "notification sent");
                Ok(())
            }
            Some(ApiResponse { description, .. }) => Err(NotificationError::Rejected {
                status: status.as_u16(),
                description: description.unwrap_or_else(|| "no description".to_string()),
            }),
            None => Err(NotificationError::Rejected {
                status: status.as_u16(),
                description: text,
            }),
        }
    }
}

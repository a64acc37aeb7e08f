//! Language-model summary of a window's records.
//!
//! Records are filtered by value, ordered by `(occurred_at, id)` and rendered
//! one JSON line each. Lines are packed greedily into batches so that the
//! whole request (system prompt, batch header and lines) stays under the
//! prompt ceiling; the split depends only on the records themselves.

mod prompt;

use std::sync::Arc;

use tracing::{debug, info};

use flowlens_models::providers::{ChatRequest, Message, ModelProvider, OpenAiProvider};

pub use prompt::SYSTEM_PROMPT;

use crate::config::EnrichmentConfig;
use crate::error::EnrichmentError;
use crate::record::AttributionRecord;

pub struct Summarizer {
    provider: Arc<dyn ModelProvider>,
    model: String,
    max_prompt_chars: usize,
    min_value: f64,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn ModelProvider>, config: &EnrichmentConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            max_prompt_chars: config.max_prompt_chars,
            min_value: config.min_value,
        }
    }

    /// Summarizer backed by the OpenAI-compatible endpoint in `config`.
    pub fn openai(config: &EnrichmentConfig) -> Result<Self, EnrichmentError> {
        let provider = OpenAiProvider::with_base_url(config.api_key.clone(), &config.base_url)?;
        Ok(Self::new(Arc::new(provider), config))
    }

    /// Split eligible records into rendered batches.
    ///
    /// A record that alone exceeds the ceiling still gets a batch of its own.
    pub fn plan_batches(
        &self,
        records: &[AttributionRecord],
    ) -> Result<Vec<Vec<String>>, EnrichmentError> {
        let mut eligible: Vec<&AttributionRecord> = records
            .iter()
            .filter(|r| r.value >= self.min_value)
            .collect();
        eligible.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let budget = self.max_prompt_chars.saturating_sub(prompt::fixed_overhead());
        let mut batches = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_chars = 0;
        for record in eligible {
            let line = serde_json::to_string(record)?;
            let chars = line.chars().count();
            // +1 for the joining newline
            if !current.is_empty() && current_chars + 1 + chars > budget {
                batches.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            current_chars += if current.is_empty() { chars } else { chars + 1 };
            current.push(line);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        Ok(batches)
    }

    /// One model call per batch; summaries are joined by a blank line.
    ///
    /// Returns an empty string without calling the model when no record is
    /// eligible.
    pub async fn summarize(&self, records: &[AttributionRecord]) -> Result<String, EnrichmentError> {
        let batches = self.plan_batches(records)?;
        if batches.is_empty() {
            debug!("no records above the value threshold, skipping model call");
            return Ok(String::new());
        }

        let total = batches.len();
        let mut parts = Vec::with_capacity(total);
        for (index, lines) in batches.iter().enumerate() {
            let request = ChatRequest::new(
                self.model.clone(),
                vec![
                    Message::system(SYSTEM_PROMPT),
                    Message::user(prompt::batch_prompt(index, total, lines)),
                ],
            )
            .temperature(0.0);

            let response = self.provider.chat(request).await?;
            debug!(
                batch = index + 1,
                of = total,
                provider = self.provider.name(),
                output_tokens = response.usage.output_tokens,
                "batch summarized"
            );
            parts.push(response.content.trim().to_string());
        }

        info!(batches = total, "summary ready");
        Ok(parts.join("\n\n"))
    }
}

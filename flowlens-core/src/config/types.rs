use serde::{Deserialize, Serialize};

/// Tunables as stored in TOML files (optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawSettings {
    #[serde(default)]
    pub attribution: RawAttributionSettings,

    #[serde(default)]
    pub enrichment: RawEnrichmentSettings,

    #[serde(default)]
    pub notify: RawNotifySettings,

    #[serde(default)]
    pub window: RawWindowSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawAttributionSettings {
    pub page_size: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawEnrichmentSettings {
    pub enabled: Option<bool>,
    pub model: Option<String>,
    pub max_prompt_chars: Option<usize>,
    pub min_value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawNotifySettings {
    pub enabled: Option<bool>,
    pub notify_on_empty: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawWindowSettings {
    pub size_minutes: Option<i64>,
    pub max_span_minutes: Option<i64>,
}

/// Final tunables with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    pub attribution: AttributionSettings,
    pub enrichment: EnrichmentSettings,
    pub notify: NotifySettings,
    pub window: WindowSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributionSettings {
    /// Records requested per page
    pub page_size: u32,
    pub timeout_secs: u64,
    /// Attempts per request, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for AttributionSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            timeout_secs: 10,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentSettings {
    pub enabled: bool,
    pub model: String,
    /// Ceiling on the rendered record payload per model call
    pub max_prompt_chars: usize,
    /// Records below this value are left out of the summary
    pub min_value: f64,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_MODEL.to_string(),
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            min_value: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifySettings {
    pub enabled: bool,
    /// Post a "no activity" message for empty windows
    pub notify_on_empty: bool,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_on_empty: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowSettings {
    /// Window length for the very first run
    pub size_minutes: i64,
    /// Longest window a single run will process
    pub max_span_minutes: i64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            size_minutes: 60,
            max_span_minutes: 24 * 60,
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 48_000;
/// Longest window span accepted from config: 366 days.
pub const MAX_WINDOW_MINUTES: i64 = 366 * 24 * 60;

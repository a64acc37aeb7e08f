//! Configuration, resolved once at startup.
//!
//! Tunables (page size, retry budget, window length, ...) come from layered
//! TOML files via [`ConfigLoader`]. Secrets and endpoints come from the
//! environment and are combined with the tunables by [`Config::resolve`],
//! which reports every missing variable at once.

mod loader;
mod types;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use flowlens_models::ApiKey;
use flowlens_models::providers::DEFAULT_OPENAI_BASE_URL;

pub use loader::{ConfigLoader, PROJECT_CONFIG_DIR_VAR};
pub use types::{
    AttributionSettings, DEFAULT_MAX_PROMPT_CHARS, DEFAULT_MODEL, DEFAULT_PAGE_SIZE,
    EnrichmentSettings, MAX_WINDOW_MINUTES, NotifySettings, Settings, WindowSettings,
};

use crate::attribution::{DEFAULT_ATTRIBUTION_BASE_URL, RetryPolicy};
use crate::error::ConfigError;
use crate::notify::DEFAULT_TELEGRAM_API_URL;
use crate::warehouse::WarehouseTarget;

pub const GBQ_URI: &str = "GBQ_URI";
pub const GBQ_ACCESS_TOKEN: &str = "GBQ_ACCESS_TOKEN";
pub const ELEMENTUS_API_KEY: &str = "ELEMENTUS_API_KEY";
pub const ELEMENTUS_BASE_URL: &str = "ELEMENTUS_BASE_URL";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
pub const TELEGRAM_CHANNEL_ID: &str = "TELEGRAM_CHANNEL_ID";
pub const TELEGRAM_API_URL: &str = "TELEGRAM_API_URL";
pub const FLOWLENS_STATE_PATH: &str = "FLOWLENS_STATE_PATH";

/// Source of environment values.
///
/// Blank values count as unset.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, key: &str) -> Option<String> {
        self(key).filter(|v| !v.trim().is_empty())
    }
}

/// Attribution API connection settings
#[derive(Debug, Clone)]
pub struct AttributionConfig {
    pub api_key: ApiKey,
    pub base_url: String,
    pub timeout: Duration,
    pub page_size: u32,
    pub retry: RetryPolicy,
}

impl AttributionConfig {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_ATTRIBUTION_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Resolve only what the attribution API needs (for `health` and `lookup`).
    pub fn resolve(settings: &AttributionSettings, env: impl EnvSource) -> Result<Self, ConfigError> {
        let api_key = env
            .var(ELEMENTUS_API_KEY)
            .ok_or(ConfigError::MissingVars(vec![ELEMENTUS_API_KEY]))?;
        Ok(Self::from_settings(
            ApiKey::new(api_key),
            env.var(ELEMENTUS_BASE_URL),
            settings,
        ))
    }

    fn from_settings(api_key: ApiKey, base_url: Option<String>, settings: &AttributionSettings) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_ATTRIBUTION_BASE_URL.to_string()),
            timeout: Duration::from_secs(settings.timeout_secs),
            page_size: settings.page_size,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                base_delay: Duration::from_millis(settings.base_delay_ms),
                max_delay: Duration::from_millis(settings.max_delay_ms),
                jitter: true,
            },
        }
    }
}

/// Run state file: `FLOWLENS_STATE_PATH`, or the XDG data directory default.
pub fn state_path(env: &impl EnvSource) -> PathBuf {
    env.var(FLOWLENS_STATE_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(flowlens_paths::run_state_path)
}

/// Language model settings for the summary stage
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub api_key: ApiKey,
    pub base_url: String,
    pub model: String,
    pub max_prompt_chars: usize,
    pub min_value: f64,
}

impl EnrichmentConfig {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            min_value: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub target: WarehouseTarget,
    /// OAuth bearer token; only used by BigQuery targets.
    pub access_token: Option<ApiKey>,
}

/// Telegram channel settings
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub token: ApiKey,
    pub channel_id: String,
    pub api_url: String,
    pub notify_on_empty: bool,
}

/// How run windows are sized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Length of the first window when no run state exists yet.
    pub size: chrono::Duration,
    /// Longest window a single run processes.
    pub max_span: chrono::Duration,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            size: chrono::Duration::hours(1),
            max_span: chrono::Duration::hours(24),
        }
    }
}

impl From<&WindowSettings> for WindowPolicy {
    fn from(settings: &WindowSettings) -> Self {
        Self {
            size: window_minutes(settings.size_minutes),
            max_span: window_minutes(settings.max_span_minutes),
        }
    }
}

/// Minutes clamped to `1..=MAX_WINDOW_MINUTES`; the loader rejects anything outside.
fn window_minutes(minutes: i64) -> chrono::Duration {
    chrono::Duration::minutes(minutes.clamp(1, MAX_WINDOW_MINUTES))
}

/// Fully resolved configuration for one run.
///
/// `enrichment` and `notifier` are `None` when the stage is disabled.
#[derive(Debug, Clone)]
pub struct Config {
    pub attribution: AttributionConfig,
    pub enrichment: Option<EnrichmentConfig>,
    pub warehouse: WarehouseConfig,
    pub notifier: Option<NotifierConfig>,
    pub window: WindowPolicy,
    pub state_path: PathBuf,
}

impl Config {
    /// Resolve against the process environment.
    pub fn from_env(settings: &Settings) -> Result<Self, ConfigError> {
        Self::resolve(settings, ProcessEnv)
    }

    /// Combine tunables with values from `env`.
    ///
    /// Variables are only required for enabled stages. All missing names are
    /// collected into a single [`ConfigError::MissingVars`].
    pub fn resolve(settings: &Settings, env: impl EnvSource) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut require = |key: &'static str| {
            let value = env.var(key);
            if value.is_none() {
                missing.push(key);
            }
            value
        };

        let gbq_uri = require(GBQ_URI);
        let attribution_key = require(ELEMENTUS_API_KEY);
        let openai_key = if settings.enrichment.enabled {
            require(OPENAI_API_KEY)
        } else {
            None
        };
        let (telegram_token, channel_id) = if settings.notify.enabled {
            (require(TELEGRAM_TOKEN), require(TELEGRAM_CHANNEL_ID))
        } else {
            (None, None)
        };

        let target = gbq_uri.map(|uri| {
            uri.parse::<WarehouseTarget>()
                .map_err(|reason| ConfigError::invalid(GBQ_URI, reason))
        });
        let access_token = env.var(GBQ_ACCESS_TOKEN);
        if let Some(Ok(WarehouseTarget::BigQuery { .. })) = &target
            && access_token.is_none()
        {
            missing.push(GBQ_ACCESS_TOKEN);
        }

        if !missing.is_empty() {
            return Err(ConfigError::MissingVars(missing));
        }

        let (Some(target), Some(attribution_key)) = (target, attribution_key) else {
            return Err(ConfigError::MissingVars(vec![GBQ_URI, ELEMENTUS_API_KEY]));
        };
        let target = target?;

        let attribution = AttributionConfig::from_settings(
            ApiKey::new(attribution_key),
            env.var(ELEMENTUS_BASE_URL),
            &settings.attribution,
        );

        let enrichment = openai_key.map(|key| EnrichmentConfig {
            api_key: ApiKey::new(key),
            base_url: env
                .var(OPENAI_BASE_URL)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model: env
                .var(OPENAI_MODEL)
                .unwrap_or_else(|| settings.enrichment.model.clone()),
            max_prompt_chars: settings.enrichment.max_prompt_chars,
            min_value: settings.enrichment.min_value,
        });

        let notifier = match (telegram_token, channel_id) {
            (Some(token), Some(channel_id)) => Some(NotifierConfig {
                token: ApiKey::new(token),
                channel_id,
                api_url: env
                    .var(TELEGRAM_API_URL)
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
                notify_on_empty: settings.notify.notify_on_empty,
            }),
            _ => None,
        };

        Ok(Self {
            attribution,
            enrichment,
            warehouse: WarehouseConfig {
                target,
                access_token: access_token.map(ApiKey::new),
            },
            notifier,
            window: WindowPolicy::from(&settings.window),
            state_path: state_path(&env),
        })
    }
}

impl fmt::Display for Config {
    /// Human-readable summary with every secret redacted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const REDACTED: &str = "[REDACTED]";

        writeln!(f, "[attribution]")?;
        writeln!(f, "  base_url     = {}", self.attribution.base_url)?;
        writeln!(f, "  api_key      = {REDACTED}")?;
        writeln!(f, "  page_size    = {}", self.attribution.page_size)?;
        writeln!(f, "  timeout      = {}s", self.attribution.timeout.as_secs())?;
        writeln!(f, "  max_attempts = {}", self.attribution.retry.max_attempts)?;

        writeln!(f, "[enrichment]")?;
        match &self.enrichment {
            Some(enrichment) => {
                writeln!(f, "  base_url         = {}", enrichment.base_url)?;
                writeln!(f, "  api_key          = {REDACTED}")?;
                writeln!(f, "  model            = {}", enrichment.model)?;
                writeln!(f, "  max_prompt_chars = {}", enrichment.max_prompt_chars)?;
                writeln!(f, "  min_value        = {}", enrichment.min_value)?;
            }
            None => writeln!(f, "  disabled")?,
        }

        writeln!(f, "[warehouse]")?;
        writeln!(f, "  target       = {}", self.warehouse.target)?;
        if self.warehouse.access_token.is_some() {
            writeln!(f, "  access_token = {REDACTED}")?;
        }

        writeln!(f, "[notify]")?;
        match &self.notifier {
            Some(notifier) => {
                writeln!(f, "  api_url         = {}", notifier.api_url)?;
                writeln!(f, "  token           = {REDACTED}")?;
                writeln!(f, "  channel_id      = {}", notifier.channel_id)?;
                writeln!(f, "  notify_on_empty = {}", notifier.notify_on_empty)?;
            }
            None => writeln!(f, "  disabled")?,
        }

        writeln!(f, "[window]")?;
        writeln!(f, "  size     = {}m", self.window.size.num_minutes())?;
        writeln!(f, "  max_span = {}m", self.window.max_span.num_minutes())?;
        write!(f, "state_path = {}", self.state_path.display())
    }
}

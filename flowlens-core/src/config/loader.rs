use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::{
    AttributionSettings, EnrichmentSettings, MAX_WINDOW_MINUTES, NotifySettings,
    RawAttributionSettings, RawEnrichmentSettings, RawNotifySettings, RawSettings,
    RawWindowSettings, Settings, WindowSettings,
};
use crate::error::ConfigError;

/// Env var that replaces the `.flowlens` project directory (useful for isolated tests)
pub const PROJECT_CONFIG_DIR_VAR: &str = "FLOWLENS_PROJECT_CONFIG_DIR";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged settings (user + project)
    pub fn load() -> Result<Settings, ConfigError> {
        Self::load_from(&[Self::user_config_path(), Self::project_config_path()])
    }

    /// Load settings from the given files in order, later files winning.
    ///
    /// Missing files are skipped.
    pub fn load_from(paths: &[PathBuf]) -> Result<Settings, ConfigError> {
        let mut raw = RawSettings::default();
        for path in paths {
            if let Some(layer) = Self::read_layer(path)? {
                debug!(path = %path.display(), "loaded config layer");
                raw = Self::merge_raw(raw, layer);
            }
        }
        Self::finalize(raw)
    }

    /// Get user config path
    pub fn user_config_path() -> PathBuf {
        flowlens_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    pub fn project_config_path() -> PathBuf {
        match std::env::var(PROJECT_CONFIG_DIR_VAR) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir).join("config.toml"),
            _ => PathBuf::from(".flowlens/config.toml"),
        }
    }

    fn read_layer(path: &Path) -> Result<Option<RawSettings>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(raw))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawSettings, overlay: RawSettings) -> RawSettings {
        RawSettings {
            attribution: RawAttributionSettings {
                page_size: overlay.attribution.page_size.or(base.attribution.page_size),
                timeout_secs: overlay
                    .attribution
                    .timeout_secs
                    .or(base.attribution.timeout_secs),
                max_attempts: overlay
                    .attribution
                    .max_attempts
                    .or(base.attribution.max_attempts),
                base_delay_ms: overlay
                    .attribution
                    .base_delay_ms
                    .or(base.attribution.base_delay_ms),
                max_delay_ms: overlay
                    .attribution
                    .max_delay_ms
                    .or(base.attribution.max_delay_ms),
            },
            enrichment: RawEnrichmentSettings {
                enabled: overlay.enrichment.enabled.or(base.enrichment.enabled),
                model: overlay.enrichment.model.or(base.enrichment.model),
                max_prompt_chars: overlay
                    .enrichment
                    .max_prompt_chars
                    .or(base.enrichment.max_prompt_chars),
                min_value: overlay.enrichment.min_value.or(base.enrichment.min_value),
            },
            notify: RawNotifySettings {
                enabled: overlay.notify.enabled.or(base.notify.enabled),
                notify_on_empty: overlay
                    .notify
                    .notify_on_empty
                    .or(base.notify.notify_on_empty),
            },
            window: RawWindowSettings {
                size_minutes: overlay.window.size_minutes.or(base.window.size_minutes),
                max_span_minutes: overlay
                    .window
                    .max_span_minutes
                    .or(base.window.max_span_minutes),
            },
        }
    }

    /// Convert raw config to final settings with defaults applied
    fn finalize(raw: RawSettings) -> Result<Settings, ConfigError> {
        let attribution_defaults = AttributionSettings::default();
        let enrichment_defaults = EnrichmentSettings::default();
        let notify_defaults = NotifySettings::default();
        let window_defaults = WindowSettings::default();

        let settings = Settings {
            attribution: AttributionSettings {
                page_size: raw
                    .attribution
                    .page_size
                    .unwrap_or(attribution_defaults.page_size),
                timeout_secs: raw
                    .attribution
                    .timeout_secs
                    .unwrap_or(attribution_defaults.timeout_secs),
                max_attempts: raw
                    .attribution
                    .max_attempts
                    .unwrap_or(attribution_defaults.max_attempts),
                base_delay_ms: raw
                    .attribution
                    .base_delay_ms
                    .unwrap_or(attribution_defaults.base_delay_ms),
                max_delay_ms: raw
                    .attribution
                    .max_delay_ms
                    .unwrap_or(attribution_defaults.max_delay_ms),
            },
            enrichment: EnrichmentSettings {
                enabled: raw.enrichment.enabled.unwrap_or(enrichment_defaults.enabled),
                model: raw.enrichment.model.unwrap_or(enrichment_defaults.model),
                max_prompt_chars: raw
                    .enrichment
                    .max_prompt_chars
                    .unwrap_or(enrichment_defaults.max_prompt_chars),
                min_value: raw
                    .enrichment
                    .min_value
                    .unwrap_or(enrichment_defaults.min_value),
            },
            notify: NotifySettings {
                enabled: raw.notify.enabled.unwrap_or(notify_defaults.enabled),
                notify_on_empty: raw
                    .notify
                    .notify_on_empty
                    .unwrap_or(notify_defaults.notify_on_empty),
            },
            window: WindowSettings {
                size_minutes: raw
                    .window
                    .size_minutes
                    .unwrap_or(window_defaults.size_minutes),
                max_span_minutes: raw
                    .window
                    .max_span_minutes
                    .unwrap_or(window_defaults.max_span_minutes),
            },
        };
        validate(&settings)?;
        Ok(settings)
    }
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.attribution.page_size == 0 {
        return Err(ConfigError::invalid("attribution.page_size", "must be at least 1"));
    }
    if settings.attribution.max_attempts == 0 {
        return Err(ConfigError::invalid(
            "attribution.max_attempts",
            "must be at least 1",
        ));
    }
    if settings.attribution.timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "attribution.timeout_secs",
            "must be at least 1",
        ));
    }
    if settings.enrichment.max_prompt_chars == 0 {
        return Err(ConfigError::invalid(
            "enrichment.max_prompt_chars",
            "must be at least 1",
        ));
    }
    if !settings.enrichment.min_value.is_finite() {
        return Err(ConfigError::invalid("enrichment.min_value", "must be finite"));
    }
    if settings.window.size_minutes <= 0 {
        return Err(ConfigError::invalid("window.size_minutes", "must be positive"));
    }
    if settings.window.size_minutes > MAX_WINDOW_MINUTES {
        return Err(ConfigError::invalid(
            "window.size_minutes",
            format!("out of range (at most {MAX_WINDOW_MINUTES})"),
        ));
    }
    if settings.window.max_span_minutes > MAX_WINDOW_MINUTES {
        return Err(ConfigError::invalid(
            "window.max_span_minutes",
            format!("out of range (at most {MAX_WINDOW_MINUTES})"),
        ));
    }
    if settings.window.max_span_minutes < settings.window.size_minutes {
        return Err(ConfigError::invalid(
            "window.max_span_minutes",
            "must not be shorter than window.size_minutes",
        ));
    }
    Ok(())
}

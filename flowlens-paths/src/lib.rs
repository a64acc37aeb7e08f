//! XDG Base Directory paths for flowlens.
//!
//! Paths follow XDG on every platform, including macOS.

use std::path::PathBuf;

/// Get the flowlens config directory.
///
/// Returns `$XDG_CONFIG_HOME/flowlens` if set, otherwise `~/.config/flowlens`.
/// The user-level `config.toml` lives here.
///
/// # Examples
///
/// ```
/// use flowlens_paths::config_dir;
///
/// let user_config = config_dir().join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    resolve(std::env::var("XDG_CONFIG_HOME").ok(), ".config")
}

/// Get the flowlens data directory.
///
/// Returns `$XDG_DATA_HOME/flowlens` if set, otherwise `~/.local/share/flowlens`.
/// The run state file is kept here unless overridden.
pub fn data_dir() -> PathBuf {
    resolve(std::env::var("XDG_DATA_HOME").ok(), ".local/share")
}

/// Default location of the persisted run state.
pub fn run_state_path() -> PathBuf {
    data_dir().join("run_state.json")
}

fn resolve(xdg: Option<String>, home_relative: &str) -> PathBuf {
    match xdg {
        Some(base) if !base.is_empty() => PathBuf::from(base).join("flowlens"),
        _ => dirs::home_dir()
            .map(|home| home.join(home_relative))
            .unwrap_or_else(|| PathBuf::from(home_relative))
            .join("flowlens"),
    }
}

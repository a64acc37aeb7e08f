//! Durable run state
//!
//! Records the end of the last window that was fully processed. It is read
//! once when a run starts and written once when it succeeds. State is
//! persisted to `$XDG_DATA_HOME/flowlens/run_state.json` by default.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;

/// Progress cursor for the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// End of the last window that was persisted successfully.
    pub last_window_end: Option<DateTime<Utc>>,
    /// When the state was last advanced.
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Create a state positioned at `end`.
    pub fn at(end: DateTime<Utc>) -> Self {
        Self {
            last_window_end: Some(end),
            updated_at: None,
        }
    }

    /// Move the cursor forward to `end`.
    ///
    /// `last_window_end` never decreases: advancing to an earlier instant (a
    /// backfill of an old window) leaves it unchanged and returns `false`.
    pub fn advance_to(&mut self, end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.last_window_end.is_some_and(|current| current >= end) {
            return false;
        }
        self.last_window_end = Some(end);
        self.updated_at = Some(now);
        true
    }
}

/// Storage for [`RunState`]. Only the orchestrator writes to it.
pub trait StateStore: Send + Sync {
    /// Load the current state; a store that was never written yields the default.
    fn load(&self) -> Result<RunState, StorageError>;

    /// Replace the stored state in a single write.
    fn save(&self, state: &RunState) -> Result<(), StorageError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// JSON file state store.
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// an interrupted run leaves either the old state or the new one.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::StateIo {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<RunState, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no run state yet");
                return Ok(RunState::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        serde_json::from_str(&content).map_err(|source| StorageError::StateFormat {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, state: &RunState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), "run state saved");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory state store (for testing and dry runs)
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<RunState>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new(state: RunState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: Mutex::new(0),
        }
    }

    /// Current state without going through the trait.
    pub fn snapshot(&self) -> RunState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<RunState, StorageError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &RunState) -> Result<(), StorageError> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    #[test]
    fn advance_moves_forward() {
        let mut state = RunState::default();
        assert!(state.advance_to(at(12), at(12)));
        assert!(state.advance_to(at(13), at(13)));
        assert_eq!(state.last_window_end, Some(at(13)));
        assert_eq!(state.updated_at, Some(at(13)));
    }

    #[test]
    fn advance_never_moves_backwards() {
        let mut state = RunState::at(at(13));
        assert!(!state.advance_to(at(12), at(14)));
        assert!(!state.advance_to(at(13), at(14)));
        assert_eq!(state.last_window_end, Some(at(13)));
        assert!(state.updated_at.is_none());
    }

    #[test]
    fn missing_file_loads_default() {
        let temp = tempdir().unwrap();
        let store = FileStateStore::new(temp.path().join("run_state.json"));
        assert_eq!(store.load().unwrap(), RunState::default());
    }

    #[test]
    fn save_then_load_returns_same_state() {
        let temp = tempdir().unwrap();
        let store = FileStateStore::new(temp.path().join("nested/dir/run_state.json"));

        let mut state = RunState::default();
        state.advance_to(at(12), at(12));
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), state);
        assert!(!temp.path().join("nested/dir/run_state.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_reset() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("run_state.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileStateStore::new(&path);
        assert!(matches!(
            store.load().unwrap_err(),
            StorageError::StateFormat { .. }
        ));
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryStateStore::default();
        store.save(&RunState::at(at(12))).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.snapshot().last_window_end, Some(at(12)));
    }
}

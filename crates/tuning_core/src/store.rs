//! Tuning config persistence.
//!
//! Two small JSON documents live side by side: the [`TuningConfig`] the game
//! reads at startup, and the [`TriggerState`] counter the scheduler uses.
//! Both are replaced by staging into a uniquely named temporary file in the
//! same directory and renaming it over the target, so a reader never sees a
//! half-written file even when several processes write at once.
//!
//! Reading is fail-open: a missing or corrupt config is the same as no config,
//! and every lookup returns its default.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{Result, TuningError};
use crate::history::{HistoryEntry, MetricsSnapshot};

/// Current config document version.
pub const SCHEMA_VERSION: u32 = 1;

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "game_tuning.json";

/// Default trigger state file name.
pub const DEFAULT_STATE_FILE: &str = "tuning_state.json";

/// The persisted tuning output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Document version.
    pub schema_version: u32,
    /// RFC 3339 generation time.
    pub generated_at: String,
    /// Sessions the adjustments were computed from.
    pub sessions_analyzed_count: u64,
    /// Parameter key -> multiplier.
    pub adjustments: BTreeMap<String, f64>,
    /// Human-readable findings.
    pub insights: Vec<String>,
    /// Overall metrics at generation time.
    #[serde(default)]
    pub metrics: MetricsSnapshot,
    /// Most recent applied tunings, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl TuningConfig {
    /// Multiplier for a key, if the config has a usable one.
    #[must_use]
    pub fn multiplier(&self, key: &str) -> Option<f64> {
        self.adjustments
            .get(key)
            .copied()
            .filter(|m| m.is_finite() && *m > 0.0)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Scheduler bookkeeping, kept apart from the config so deleting the config
/// does not force a re-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    /// Distinct sessions seen at the last successful run.
    pub sessions_analyzed_count: u64,
}

/// What [`TuningStore::reset`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// A config file existed and was deleted.
    pub config_removed: bool,
    /// A state file existed and was deleted.
    pub state_removed: bool,
}

/// File-backed store for the config and trigger state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningStore {
    config_path: PathBuf,
    state_path: PathBuf,
}

impl TuningStore {
    /// Create a store over the given paths. Nothing is touched until used.
    pub fn new(config_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            state_path: state_path.into(),
        }
    }

    /// Store using the default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(DEFAULT_CONFIG_FILE), dir.join(DEFAULT_STATE_FILE))
    }

    /// Config document path.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Trigger state path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Replace the config document.
    pub fn write(&self, config: &TuningConfig) -> Result<()> {
        write_atomic(&self.config_path, config.to_json()?.as_bytes())?;
        info!(
            path = %self.config_path.display(),
            adjustments = config.adjustments.len(),
            "Wrote tuning config"
        );
        Ok(())
    }

    /// Current config, or `None` if absent or unreadable.
    #[must_use]
    pub fn read(&self) -> Option<TuningConfig> {
        let contents = match fs::read_to_string(&self.config_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.config_path.display(), error = %e, "Tuning config unreadable");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %self.config_path.display(), error = %e, "Ignoring corrupt tuning config");
                None
            }
        }
    }

    /// Multiplier for `key`, or `default` when there is no usable value.
    #[must_use]
    pub fn lookup(&self, key: &str, default: f64) -> f64 {
        self.read()
            .and_then(|config| config.multiplier(key))
            .unwrap_or(default)
    }

    /// Scheduler counter; a missing or corrupt file counts as zero.
    #[must_use]
    pub fn read_state(&self) -> TriggerState {
        match fs::read_to_string(&self.state_path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %self.state_path.display(), error = %e, "Ignoring corrupt trigger state");
                TriggerState::default()
            }),
            Err(_) => TriggerState::default(),
        }
    }

    /// Replace the scheduler counter.
    pub fn write_state(&self, state: &TriggerState) -> Result<()> {
        write_atomic(&self.state_path, serde_json::to_string_pretty(state)?.as_bytes())
    }

    /// Replace both documents, or neither.
    ///
    /// Both are staged first; if the second rename fails the previous config
    /// is put back. Staged files that are never renamed are deleted on drop.
    pub fn commit(&self, config: &TuningConfig, state: &TriggerState) -> Result<()> {
        let config_json = config.to_json()?;
        let state_json = serde_json::to_string_pretty(state)?;

        let config_tmp = stage(&self.config_path, config_json.as_bytes())?;
        let state_tmp = stage(&self.state_path, state_json.as_bytes())?;

        let previous = fs::read(&self.config_path).ok();

        config_tmp
            .persist(&self.config_path)
            .map_err(|e| TuningError::io(&self.config_path, e.error))?;

        if let Err(e) = state_tmp.persist(&self.state_path) {
            let restored = match &previous {
                Some(bytes) => write_atomic(&self.config_path, bytes),
                None => fs::remove_file(&self.config_path)
                    .map_err(|e| TuningError::io(&self.config_path, e)),
            };
            if let Err(restore) = restored {
                warn!(error = %restore, "Failed to roll back tuning config");
            }
            return Err(TuningError::io(&self.state_path, e.error));
        }

        info!(
            config = %self.config_path.display(),
            sessions = state.sessions_analyzed_count,
            adjustments = config.adjustments.len(),
            "Committed tuning config"
        );
        Ok(())
    }

    /// Delete the config, and the trigger state too when `include_state`.
    pub fn reset(&self, include_state: bool) -> Result<ResetReport> {
        let config_removed = remove_if_present(&self.config_path)?;
        let state_removed = if include_state {
            remove_if_present(&self.state_path)?
        } else {
            false
        };
        info!(config_removed, state_removed, "Reset tuning store");
        Ok(ResetReport {
            config_removed,
            state_removed,
        })
    }
}

/// Write `bytes` to a fresh temporary file next to `target`, so the final
/// rename stays on one filesystem and concurrent writers never share a file.
fn stage(target: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| TuningError::io(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| TuningError::io(parent, e))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| TuningError::io(tmp.path(), e))?;
    Ok(tmp)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    stage(path, bytes)?
        .persist(path)
        .map(|_| ())
        .map_err(|e| TuningError::io(path, e.error))
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TuningError::io(path, e)),
    }
}

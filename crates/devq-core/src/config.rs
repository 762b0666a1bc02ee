//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Configuration shared by the runner and the operation engine.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Path or name of the `adb` executable.
    #[builder(default = "default_adb_path()")]
    #[serde(default = "default_adb_path")]
    pub adb_path: String,

    /// Device directory holding recycled items and their sidecars.
    #[builder(default = "default_trash_root()")]
    #[serde(default = "default_trash_root")]
    pub trash_root: String,

    /// Extension of trash sidecar files.
    #[builder(default = "default_index_suffix()")]
    #[serde(default = "default_index_suffix")]
    pub index_suffix: String,

    /// Suffix inserted before the counter of a duplicated name.
    #[builder(default = "default_copy_suffix()")]
    #[serde(default = "default_copy_suffix")]
    pub copy_suffix: String,

    /// Rename the target automatically when it already exists.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub auto_resolve_conflicts: bool,

    /// Time a canceled command gets to exit after stdin closes.
    #[builder(default = "3000")]
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Time `stop` waits for running operations before aborting them.
    #[builder(default = "5000")]
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Capacity of the queue event channel.
    #[builder(default = "256")]
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Retry through `busybox` when a shell command is missing.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub busybox_fallback: bool,

    /// Preserve modification times on pull and push.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub keep_date_modified: bool,
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_trash_root() -> String {
    "/sdcard/.Trash-AdbExplorer".to_string()
}

fn default_index_suffix() -> String {
    ".index".to_string()
}

fn default_copy_suffix() -> String {
    " - Copy".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cancel_grace_ms() -> u64 {
    3000
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

fn default_event_capacity() -> usize {
    256
}

fn timeout_message(stop: u64, grace: u64) -> String {
    format!("stop timeout ({stop} ms) must exceed the cancel grace period ({grace} ms)")
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref adb) = self.adb_path
            && adb.trim().is_empty()
        {
            return Err("adb path cannot be empty".to_string());
        }
        if let Some(ref root) = self.trash_root
            && !root.starts_with('/')
        {
            return Err(format!("trash root must be absolute: {root}"));
        }
        if self.cancel_grace_ms == Some(0) {
            return Err("cancel grace period must be positive".to_string());
        }
        if self.event_capacity == Some(0) {
            return Err("event capacity must be positive".to_string());
        }
        let grace = self.cancel_grace_ms.unwrap_or_else(default_cancel_grace_ms);
        let stop = self.stop_timeout_ms.unwrap_or_else(default_stop_timeout_ms);
        if stop <= grace {
            return Err(timeout_message(stop, grace));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            trash_root: default_trash_root(),
            index_suffix: default_index_suffix(),
            copy_suffix: default_copy_suffix(),
            auto_resolve_conflicts: true,
            cancel_grace_ms: default_cancel_grace_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            event_capacity: default_event_capacity(),
            busybox_fallback: true,
            keep_date_modified: true,
        }
    }
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("devq")
            .join("config.toml")
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(target: "devq::config", path = %path.display(), "config not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(CoreError::ConfigIo {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = toml::from_str(&content).map_err(|source| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.check()?;
        Ok(config)
    }

    /// Validate values read from a file.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.adb_path.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                message: "adb path cannot be empty".to_string(),
            });
        }
        if !self.trash_root.starts_with('/') {
            return Err(CoreError::InvalidConfig {
                message: format!("trash root must be absolute: {}", self.trash_root),
            });
        }
        if self.cancel_grace_ms == 0 || self.event_capacity == 0 {
            return Err(CoreError::InvalidConfig {
                message: "cancel grace period and event capacity must be positive".to_string(),
            });
        }
        if self.stop_timeout_ms <= self.cancel_grace_ms {
            return Err(CoreError::InvalidConfig {
                message: timeout_message(self.stop_timeout_ms, self.cancel_grace_ms),
            });
        }
        Ok(())
    }

    /// Cancel grace period as a duration.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Stop timeout as a duration.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

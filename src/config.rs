//! terrapatch configuration
//!
//! Settings for the run driver and the patcher, read from `terrapatch.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags (`--swarm-exe`, `--timeout`)
//! 2. Environment variables (`TERRAPATCH_SWARM_EXE`)
//! 3. Config file (`--config FILE`, else `./terrapatch.toml` if present)
//! 4. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PatchError;
use crate::patch::{PatchSettings, DESTINATION_KEY, POST_BUILD_KEY};

/// Default config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "terrapatch.toml";

/// Environment override for the Swarm executable
pub const SWARM_EXE_ENV: &str = "TERRAPATCH_SWARM_EXE";

pub const DEFAULT_SWARM_EXE: &str = r"C:\Program Files\QuadSpinner\Gaea 2\Gaea.Swarm.exe";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Build tool executable
    pub swarm_exe: PathBuf,

    /// Directory for the per-run temporary terrain copy
    pub temp_dir: PathBuf,

    /// File whose appearance in the output directory marks a finished build
    pub marker_file: String,

    pub poll_interval_ms: u64,

    /// Interval between "still waiting" log lines
    pub heartbeat_secs: u64,

    /// Give up waiting for the marker after this long (unset = wait forever)
    pub timeout_secs: Option<u64>,

    /// Time the tool gets to exit after the marker appeared
    pub exit_grace_secs: u64,

    pub destination_key: String,
    pub post_build_key: String,
    pub post_build_script: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            swarm_exe: PathBuf::from(DEFAULT_SWARM_EXE),
            temp_dir: PathBuf::from("temp"),
            marker_file: "report.txt".to_string(),
            poll_interval_ms: 1000,
            heartbeat_secs: 30,
            timeout_secs: None,
            exit_grace_secs: 10,
            destination_key: DESTINATION_KEY.to_string(),
            post_build_key: POST_BUILD_KEY.to_string(),
            post_build_script: String::new(),
        }
    }
}

impl Config {
    /// Load from an explicit file, or `./terrapatch.toml`, or defaults.
    ///
    /// An explicit path must exist; the implicit one is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, PatchError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(CONFIG_FILE_NAME);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, PatchError> {
        let content = fs::read_to_string(path).map_err(|e| PatchError::Config {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config = Self::from_toml(&content).map_err(|e| PatchError::Config {
            reason: format!("{}: {}", path.display(), e),
        })?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, PatchError> {
        let config: Self = toml::from_str(content).map_err(|e| PatchError::Config {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PatchError> {
        if self.poll_interval_ms == 0 {
            return Err(PatchError::Config {
                reason: "poll_interval_ms must be greater than 0".to_string(),
            });
        }
        if self.marker_file.is_empty() {
            return Err(PatchError::Config {
                reason: "marker_file must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(mut self) -> Self {
        if let Ok(exe) = std::env::var(SWARM_EXE_ENV) {
            if !exe.is_empty() {
                self.swarm_exe = PathBuf::from(exe);
            }
        }
        self
    }

    pub fn patch_settings(&self) -> PatchSettings {
        PatchSettings {
            destination_key: self.destination_key.clone(),
            post_build_key: self.post_build_key.clone(),
            post_build_script: self.post_build_script.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_secs(self.exit_grace_secs)
    }
}

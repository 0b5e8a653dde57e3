//! # Run Driver
//!
//! Hands a patched document to the external build tool and waits for it.
//!
//! ## Overview
//!
//! - [`BuildTool`] - launches a build for a terrain file
//! - [`SwarmTool`] - production tool, runs `Gaea.Swarm.exe -filename <file>`
//! - [`MockTool`] - test tool, records launches and writes the marker itself
//! - [`RunDriver`] - persist, launch, wait for the completion marker, clean up
//!
//! ## Completion
//!
//! Swarm signals a finished build by writing `report.txt` into the output
//! directory. The driver polls for that file, logs a heartbeat while it
//! waits, and fails early if the tool exits unsuccessfully first. Without a
//! configured timeout the wait is unbounded.
//!
//! ## Creating Tools
//!
//! ```rust
//! use terrapatch::config::Config;
//! use terrapatch::driver::create_tool;
//!
//! let config = Config::default();
//! assert!(create_tool("swarm", &config).is_ok());
//! assert!(create_tool("mock", &config).is_ok());
//! assert!(create_tool("blender", &config).is_err());
//! ```

mod mock;
mod swarm;

pub use mock::{MockBehavior, MockLaunch, MockTool};
pub use swarm::{ChildProcess, SwarmTool};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::Config;
use crate::document;
use crate::error::PatchError;
use crate::output_dir::absolutize;

/// How a build process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildExit {
    pub success: bool,
    pub code: Option<i32>,
}

impl From<std::process::ExitStatus> for BuildExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }
}

/// Handle on a running build.
pub trait BuildProcess {
    /// Non-blocking exit check
    fn try_wait(&mut self) -> io::Result<Option<BuildExit>>;

    /// Block up to `timeout` for the process to exit
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<BuildExit>>;

    fn kill(&mut self) -> io::Result<()>;
}

/// Something that can build a terrain file.
pub trait BuildTool {
    fn name(&self) -> &str;

    /// Start a build of `terrain_file` targeting `output_dir`.
    fn launch(&self, terrain_file: &Path, output_dir: &Path) -> Result<Box<dyn BuildProcess>, PatchError>;

    /// Whether the tool can be launched at all
    fn is_available(&self) -> bool {
        true
    }
}

/// Create a build tool by name (`swarm` or `mock`).
pub fn create_tool(name: &str, config: &Config) -> Result<Box<dyn BuildTool>, PatchError> {
    match name {
        "swarm" => Ok(Box::new(SwarmTool::new(&config.swarm_exe))),
        "mock" => Ok(Box::new(MockTool::new(&config.marker_file))),
        other => Err(PatchError::InvalidArgs {
            reason: format!("unknown build tool '{}' (expected swarm or mock)", other),
        }),
    }
}

/// Driver timing and file layout.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub temp_dir: PathBuf,
    pub marker_file: String,
    pub poll_interval: Duration,
    pub heartbeat: Duration,
    pub timeout: Option<Duration>,
    pub exit_grace: Duration,
}

impl From<&Config> for DriverSettings {
    fn from(config: &Config) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            marker_file: config.marker_file.clone(),
            poll_interval: config.poll_interval(),
            heartbeat: config.heartbeat(),
            timeout: config.timeout(),
            exit_grace: config.exit_grace(),
        }
    }
}

/// Result of one finished build.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output_dir: PathBuf,
    pub marker: PathBuf,
    pub elapsed: Duration,
    /// Exit status, if the tool exited within the grace period
    pub exit: Option<BuildExit>,
}

/// Temporary terrain copy, removed on drop.
struct TempTerrain {
    path: PathBuf,
}

impl TempTerrain {
    fn write(path: PathBuf, doc: &Value) -> Result<Self, PatchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        document::save(doc, &path)?;
        Ok(Self { path })
    }
}

impl Drop for TempTerrain {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "temporary terrain removed"),
            Err(e) => tracing::warn!(path = %self.path.display(), "could not remove temporary terrain: {}", e),
        }
    }
}

/// Runs one build at a time.
pub struct RunDriver {
    tool: Box<dyn BuildTool>,
    settings: DriverSettings,
}

impl RunDriver {
    pub fn new(tool: Box<dyn BuildTool>, settings: DriverSettings) -> Self {
        Self { tool, settings }
    }

    pub fn tool(&self) -> &dyn BuildTool {
        self.tool.as_ref()
    }

    /// Temporary file used for a terrain named `terrain_name`.
    pub fn temp_path(&self, terrain_name: &str) -> PathBuf {
        self.settings.temp_dir.join(format!("temp_{}", terrain_name))
    }

    /// Persist `doc`, build it into `output_dir`, wait for the marker.
    ///
    /// The temporary copy is removed on every exit path.
    pub fn execute(&self, doc: &Value, terrain_name: &str, output_dir: &Path) -> Result<RunSummary, PatchError> {
        let started = Instant::now();

        fs::create_dir_all(output_dir)?;
        let marker = output_dir.join(&self.settings.marker_file);
        if marker.exists() {
            tracing::info!(marker = %marker.display(), "removing marker left by a previous build");
            fs::remove_file(&marker)?;
        }

        let temp = TempTerrain::write(self.temp_path(terrain_name), doc)?;
        let terrain_file = absolutize(&temp.path)?;

        tracing::info!(
            tool = self.tool.name(),
            terrain = %terrain_file.display(),
            output = %output_dir.display(),
            "launching build"
        );
        let mut process = self.tool.launch(&terrain_file, output_dir)?;
        tracing::info!(marker = %marker.display(), "waiting for build report");

        let mut exit = self.wait_for_marker(process.as_mut(), &marker, started)?;

        if exit.is_none() {
            exit = process.wait_timeout(self.settings.exit_grace)?;
            if exit.is_none() {
                tracing::warn!(
                    tool = self.tool.name(),
                    "build reported completion but is still running; stopping it"
                );
                process.kill()?;
            }
        }

        let elapsed = started.elapsed();
        tracing::info!(elapsed_secs = elapsed.as_secs(), "build completed");
        drop(temp);

        Ok(RunSummary {
            output_dir: output_dir.to_path_buf(),
            marker,
            elapsed,
            exit,
        })
    }

    fn wait_for_marker(
        &self,
        process: &mut dyn BuildProcess,
        marker: &Path,
        started: Instant,
    ) -> Result<Option<BuildExit>, PatchError> {
        let mut last_heartbeat = Instant::now();
        let mut exit: Option<BuildExit> = None;

        loop {
            if marker.exists() {
                tracing::info!(marker = %marker.display(), "build report found");
                return Ok(exit);
            }

            if exit.is_none() {
                let polled = match process.try_wait() {
                    Ok(polled) => polled,
                    Err(e) => {
                        let _ = process.kill();
                        return Err(e.into());
                    }
                };
                if let Some(status) = polled {
                    if !status.success {
                        return Err(PatchError::ToolFailed {
                            tool: self.tool.name().to_string(),
                            code: status.code,
                        });
                    }
                    tracing::info!("build process exited; still waiting for report");
                    exit = Some(status);
                }
            }

            if let Some(limit) = self.settings.timeout {
                if started.elapsed() >= limit {
                    if exit.is_none() {
                        let _ = process.kill();
                    }
                    return Err(PatchError::MarkerTimeout {
                        marker: marker.display().to_string(),
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
            }

            if last_heartbeat.elapsed() >= self.settings.heartbeat {
                tracing::info!(
                    waited_secs = started.elapsed().as_secs(),
                    "still waiting for {}",
                    self.settings.marker_file
                );
                last_heartbeat = Instant::now();
            }

            thread::sleep(self.settings.poll_interval);
        }
    }
}

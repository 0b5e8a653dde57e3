//! Mock build tool for testing
//!
//! Records every launch (including the document it was handed) and
//! simulates the build outcome without running Gaea.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::{BuildExit, BuildProcess, BuildTool};
use crate::document;
use crate::error::PatchError;

/// Simulated build outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockBehavior {
    /// Write the marker and exit with code 0
    #[default]
    Succeed,
    /// Exit with the given code without writing the marker
    Fail(i32),
    /// Never write the marker, never exit
    Hang,
    /// Write the marker, then keep running
    MarkerThenHang,
    /// Keep running, but polling the process fails
    WaitError,
}

/// One recorded launch
#[derive(Debug, Clone)]
pub struct MockLaunch {
    pub terrain_file: PathBuf,
    pub output_dir: PathBuf,
    /// Document as persisted at launch time
    pub document: Value,
}

pub struct MockTool {
    marker_file: String,
    behavior: MockBehavior,
    launches: Arc<Mutex<Vec<MockLaunch>>>,
    kills: Arc<Mutex<usize>>,
}

impl MockTool {
    pub fn new(marker_file: impl Into<String>) -> Self {
        Self {
            marker_file: marker_file.into(),
            behavior: MockBehavior::default(),
            launches: Arc::new(Mutex::new(Vec::new())),
            kills: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Shared log of launches, readable after the tool moved into a driver
    pub fn launches_handle(&self) -> Arc<Mutex<Vec<MockLaunch>>> {
        Arc::clone(&self.launches)
    }

    /// Shared count of kill requests
    pub fn kills_handle(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.kills)
    }
}

impl BuildTool for MockTool {
    fn name(&self) -> &str {
        "mock"
    }

    fn launch(&self, terrain_file: &Path, output_dir: &Path) -> Result<Box<dyn BuildProcess>, PatchError> {
        let document = document::load(terrain_file)?;
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(MockLaunch {
                terrain_file: terrain_file.to_path_buf(),
                output_dir: output_dir.to_path_buf(),
                document,
            });
        }

        if matches!(self.behavior, MockBehavior::Succeed | MockBehavior::MarkerThenHang) {
            fs::write(output_dir.join(&self.marker_file), "mock build\n")?;
        }

        Ok(Box::new(MockProcess {
            behavior: self.behavior,
            kills: Arc::clone(&self.kills),
        }))
    }
}

struct MockProcess {
    behavior: MockBehavior,
    kills: Arc<Mutex<usize>>,
}

impl MockProcess {
    fn exit(&self) -> Option<BuildExit> {
        match self.behavior {
            MockBehavior::Succeed => Some(BuildExit {
                success: true,
                code: Some(0),
            }),
            MockBehavior::Fail(code) => Some(BuildExit {
                success: false,
                code: Some(code),
            }),
            MockBehavior::Hang | MockBehavior::MarkerThenHang | MockBehavior::WaitError => None,
        }
    }
}

impl BuildProcess for MockProcess {
    fn try_wait(&mut self) -> io::Result<Option<BuildExit>> {
        if self.behavior == MockBehavior::WaitError {
            return Err(io::Error::new(io::ErrorKind::Other, "process handle lost"));
        }
        Ok(self.exit())
    }

    fn wait_timeout(&mut self, _timeout: Duration) -> io::Result<Option<BuildExit>> {
        Ok(self.exit())
    }

    fn kill(&mut self) -> io::Result<()> {
        if let Ok(mut kills) = self.kills.lock() {
            *kills += 1;
        }
        Ok(())
    }
}

//! Gaea Swarm build tool
//!
//! Runs `Gaea.Swarm.exe -filename <terrain>` as a child process. Swarm's own
//! output goes straight to the console.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;

use wait_timeout::ChildExt;

use super::{BuildExit, BuildProcess, BuildTool};
use crate::error::PatchError;

pub struct SwarmTool {
    exe: PathBuf,
}

impl SwarmTool {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    fn command(&self, terrain_file: &Path) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("-filename").arg(terrain_file);
        cmd
    }
}

impl BuildTool for SwarmTool {
    fn name(&self) -> &str {
        "swarm"
    }

    fn launch(&self, terrain_file: &Path, _output_dir: &Path) -> Result<Box<dyn BuildProcess>, PatchError> {
        let mut cmd = self.command(terrain_file);
        tracing::info!("Executing command: {:?}", cmd);
        let child = cmd.spawn().map_err(|e| PatchError::ToolLaunch {
            tool: self.exe.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(Box::new(ChildProcess::new(child)))
    }

    fn is_available(&self) -> bool {
        self.exe.is_file()
    }
}

/// A spawned OS process.
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl BuildProcess for ChildProcess {
    fn try_wait(&mut self) -> io::Result<Option<BuildExit>> {
        Ok(self.child.try_wait()?.map(BuildExit::from))
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<BuildExit>> {
        Ok(self.child.wait_timeout(timeout)?.map(BuildExit::from))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        // Reap the zombie
        let _ = self.child.wait();
        Ok(())
    }
}

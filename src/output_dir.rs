//! Numbered output directories
//!
//! With `--increment`, each run writes into the next free `NNN`
//! subdirectory of the base output directory (`001`, `002`, ...).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PatchError;

/// Highest all-digit subdirectory name under `base`, as a number.
pub fn highest_numbered(base: &Path) -> Result<Option<u64>, PatchError> {
    if !base.exists() {
        return Ok(None);
    }
    let mut highest = None;
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(n) = name.parse::<u64>() {
            highest = highest.max(Some(n));
        }
    }
    Ok(highest)
}

/// Create and return the next numbered directory under `base`.
pub fn next_numbered(base: &Path) -> Result<PathBuf, PatchError> {
    fs::create_dir_all(base)?;
    let next = match highest_numbered(base)? {
        None => 1,
        Some(n) => n.checked_add(1).ok_or_else(|| PatchError::InvalidArgs {
            reason: format!("no numbered directory left after {} in {}", n, base.display()),
        })?,
    };
    let dir = base.join(format!("{:03}", next));
    fs::create_dir_all(&dir)?;
    tracing::info!(dir = %dir.display(), "allocated output directory");
    Ok(dir)
}

/// Make `path` absolute against the working directory without touching the
/// filesystem.
pub fn absolutize(path: &Path) -> Result<PathBuf, PatchError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

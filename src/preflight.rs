//! Checks made before a run touches anything: report targets that another
//! program holds open, and a lock file that keeps two apply runs apart.

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::MergeError;

/// Fail if any existing report file cannot be opened for writing.
///
/// Missing files are fine (they will be created). Every locked path is
/// collected so the user sees all of them at once.
pub fn probe_reports(paths: &[PathBuf]) -> Result<(), MergeError> {
    let mut locked = Vec::new();
    for path in paths {
        if !path.exists() {
            continue;
        }
        match OpenOptions::new().append(true).open(path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => locked.push(path.clone()),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "report probe inconclusive");
            }
        }
    }
    if locked.is_empty() {
        Ok(())
    } else {
        Err(MergeError::ReportLocked { paths: locked })
    }
}

/// Exclusive run lock. The file is removed when the guard drops.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, MergeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MergeError::io("create", parent, e))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let stamp = Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
                writeln!(file, "pid={} started={}", std::process::id(), stamp)
                    .map_err(|e| MergeError::io("write", path, e))?;
                tracing::debug!(path = %path.display(), "run lock acquired");
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                Err(MergeError::RunLocked {
                    path: path.to_path_buf(),
                    holder: if holder.is_empty() {
                        "unknown holder".to_string()
                    } else {
                        holder
                    },
                })
            }
            Err(e) => Err(MergeError::io("lock", path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "could not remove run lock");
        }
    }
}

//! Error kinds for the reconciliation pipeline.
//!
//! Component operations return [`MergeError`]. Whether a failure aborts the
//! run or is logged and skipped is decided by [`MergeError::is_fatal`], not by
//! where the error happens to be caught.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    /// A filesystem operation on one path failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The audit ledger could not be read or written.
    #[error("ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    /// One or more report targets are open in another program.
    #[error("report target(s) locked: {}", display_paths(paths))]
    ReportLocked { paths: Vec<PathBuf> },

    /// Another run holds the run lock.
    #[error("run lock {} is held ({holder})", path.display())]
    RunLocked { path: PathBuf, holder: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MergeError {
    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        MergeError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Fatal errors abort the whole run; the rest are scoped to one file or
    /// one identity key.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MergeError::Io { .. })
    }

    /// Failures detected before anything was mutated.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            MergeError::ReportLocked { .. } | MergeError::RunLocked { .. }
        )
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extension for attaching the failing path to an `io::Result`.
pub trait IoResultExt<T> {
    fn at(self, op: &'static str, path: &Path) -> Result<T, MergeError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, op: &'static str, path: &Path) -> Result<T, MergeError> {
        self.map_err(|e| MergeError::io(op, path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_not_fatal() {
        let err = MergeError::io(
            "copy",
            Path::new("/tmp/x"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(!err.is_fatal());
        assert!(err.to_string().starts_with("copy /tmp/x"));
    }

    #[test]
    fn locks_are_fatal_preflight() {
        let err = MergeError::ReportLocked {
            paths: vec![PathBuf::from("a.json"), PathBuf::from("b.xlsx")],
        };
        assert!(err.is_fatal());
        assert!(err.is_preflight());
        assert!(err.to_string().contains("a.json, b.xlsx"));
    }
}

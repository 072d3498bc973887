use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, MergeError};
use crate::scan::{top_level, EntryKind};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub moved: usize,
    pub kept: usize,
    /// Files that could not be moved and were left in place.
    pub failed: Vec<PathBuf>,
}

/// Dated archive bucket: `archive_root/YYYY-MM-DD`.
pub fn archive_dir(archive_root: &Path, today: NaiveDate) -> PathBuf {
    archive_root.join(today.format("%Y-%m-%d").to_string())
}

/// Move every top-level file in `staging_dir` whose name is not in `keep`
/// into the dated archive bucket. `keep` holds lowercased names and the
/// match ignores case. Nothing is deleted; a file that cannot be
/// moved stays where it is and counts as kept.
pub fn sweep(
    staging_dir: &Path,
    archive_root: &Path,
    keep: &HashSet<String>,
    today: NaiveDate,
) -> Result<SweepOutcome, MergeError> {
    let mut outcome = SweepOutcome::default();
    if !staging_dir.is_dir() {
        return Ok(outcome);
    }
    let bucket = archive_dir(archive_root, today);

    for path in top_level(staging_dir, EntryKind::File) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if keep.contains(&name.to_lowercase()) {
            outcome.kept += 1;
            continue;
        }

        // Bucket is only created once something actually moves.
        fs::create_dir_all(&bucket).at("create", &bucket)?;
        let dest = bucket.join(&name);
        match move_file(&path, &dest) {
            Ok(()) => {
                tracing::info!(from = %path.display(), to = %dest.display(), "archived");
                outcome.moved += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "archive move failed; leaving file in place");
                outcome.kept += 1;
                outcome.failed.push(path);
            }
        }
    }
    Ok(outcome)
}

/// Rename, falling back to copy + remove across filesystems. If the source
/// cannot be removed the copy is discarded so the file exists exactly once.
fn move_file(src: &Path, dest: &Path) -> Result<(), MergeError> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    fs::copy(src, dest).at("copy", dest)?;
    if let Err(e) = fs::remove_file(src) {
        let _ = fs::remove_file(dest);
        return Err(MergeError::io("remove", src, e));
    }
    Ok(())
}

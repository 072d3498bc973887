//! Promotion of winners into the staging folder.
//!
//! A promotion never edits the destination in place: the winner is copied to
//! a temporary sibling and renamed over the destination. Existing content that
//! differs from the winner is first copied aside to a timestamped backup.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, MergeError};
use crate::extract::sha256_file;
use crate::models::{Candidate, Identity};

/// Result of one successful promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promoted {
    pub destination: PathBuf,
    pub backup: Option<PathBuf>,
}

/// Copy `winner` to `destination`, backing up differing prior content.
pub fn promote(
    winner: &Candidate,
    destination: &Path,
    now: DateTime<Local>,
) -> Result<Promoted, MergeError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).at("create", parent)?;
    }

    let mut backup = None;
    if destination.is_file() && sha256_file(destination)? != winner.content_digest {
        let target = backup_path(destination, now);
        copy_with_mtime(destination, &target)?;
        tracing::info!(
            staged = %destination.display(),
            backup = %target.display(),
            "backed up staged content"
        );
        backup = Some(target);
    }

    let tmp = temp_sibling(destination);
    if let Err(e) = copy_with_mtime(&winner.path, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, destination) {
        let _ = fs::remove_file(&tmp);
        return Err(MergeError::io("rename", destination, e));
    }

    Ok(Promoted {
        destination: destination.to_path_buf(),
        backup,
    })
}

/// Copy bytes and carry the source modification time over when the
/// filesystem allows it.
fn copy_with_mtime(src: &Path, dst: &Path) -> Result<(), MergeError> {
    fs::copy(src, dst).at("copy", dst)?;
    let modified = fs::metadata(src).and_then(|m| m.modified());
    if let Ok(modified) = modified {
        let result = fs::File::options()
            .write(true)
            .open(dst)
            .and_then(|f| f.set_modified(modified));
        if let Err(e) = result {
            tracing::debug!(path = %dst.display(), error = %e, "could not preserve mtime");
        }
    }
    Ok(())
}

/// `<name>.bak.<YYYYmmdd-HHMMSS>` next to the staged file, with `-N`
/// appended until the name is free.
pub fn backup_path(destination: &Path, now: DateTime<Local>) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stamp = now.format("%Y%m%d-%H%M%S");
    let first = destination.with_file_name(format!("{}.bak.{}", name, stamp));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| destination.with_file_name(format!("{}.bak.{}-{}", name, stamp, n)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

fn temp_sibling(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.pmerge-tmp", name))
}

/// Deterministic staged file name for an identity.
///
/// `<sanitized name>__<id8>.<ext>`; without a name the base is
/// `preview_<id8>` or the source file stem.
pub fn canonical_name(identity: &Identity, source: &Path) -> String {
    let id8: Option<String> = identity
        .opaque_id
        .as_deref()
        .map(|id| sanitize(&id.chars().take(8).collect::<String>()))
        .filter(|s| !s.is_empty());

    let named = identity
        .display_name
        .as_deref()
        .map(sanitize)
        .filter(|s| !s.is_empty());
    let base = match (named, &id8) {
        (Some(name), _) => name,
        (None, Some(id8)) => format!("preview_{}", id8),
        (None, None) => source
            .file_stem()
            .map(|s| sanitize(&s.to_string_lossy()))
            .unwrap_or_default(),
    };

    let tag = id8.map(|id| format!("__{}", id)).unwrap_or_default();
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}{}{}", base, tag, ext)
}

/// Keep alphanumerics, space, `-`, `_` and `.`; everything else becomes `_`.
pub fn sanitize(s: &str) -> String {
    s.chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

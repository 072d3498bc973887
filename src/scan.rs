use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::extract::CandidateExtractor;
use crate::models::Candidate;

/// Candidates found in one scan plus the files that had to be dropped.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<Candidate>,
    pub dropped: Vec<PathBuf>,
}

/// Scan `input_root/<contributor>/*` (one level, no recursion) and run every
/// matching file through the extractor.
pub fn scan_contributors(
    input_root: &Path,
    include_globs: &[String],
    extractor: &dyn CandidateExtractor,
) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    if !input_root.is_dir() {
        tracing::warn!(root = %input_root.display(), "input root does not exist; nothing to scan");
        return Ok(outcome);
    }

    let include_set = build_globset(include_globs)?;

    for owner_dir in top_level(input_root, EntryKind::Dir) {
        let owner = owner_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        for path in top_level(&owner_dir, EntryKind::File) {
            if !matches_name(&include_set, &path) {
                continue;
            }
            match extractor.extract(&path) {
                Some(ex) => {
                    // Extractors only return identities that produce a key.
                    let Some(identity_key) = ex.identity.key() else {
                        outcome.dropped.push(path);
                        continue;
                    };
                    outcome.candidates.push(Candidate {
                        identity_key,
                        identity: ex.identity,
                        owner: owner.clone(),
                        path,
                        size: ex.size,
                        mtime: ex.mtime,
                        content_digest: ex.content_digest,
                        comment_health: ex.comment_health,
                    });
                }
                None => {
                    tracing::info!(path = %path.display(), "dropped: no usable identity");
                    outcome.dropped.push(path);
                }
            }
        }
    }

    tracing::debug!(
        candidates = outcome.candidates.len(),
        dropped = outcome.dropped.len(),
        "scan complete"
    );
    Ok(outcome)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Dir,
    File,
}

/// Direct children of `root` of the given kind, sorted by path. Unreadable
/// entries are logged and skipped.
pub(crate) fn top_level(root: &Path, kind: EntryKind) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let walker = WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let ft = entry.file_type();
        let wanted = match kind {
            EntryKind::Dir => ft.is_dir(),
            EntryKind::File => ft.is_file(),
        };
        if wanted {
            out.push(entry.into_path());
        }
    }
    out
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Globs are matched against the file name only.
pub(crate) fn matches_name(set: &GlobSet, path: &Path) -> bool {
    path.file_name().map(|n| set.is_match(n)).unwrap_or(false)
}

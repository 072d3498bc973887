//! Staging decisions: locate what is currently promoted for an identity and
//! decide whether the selected winner replaces it.

use globset::GlobSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, MergeError};
use crate::extract::{sha256_file, to_utc, CandidateExtractor};
use crate::models::{Action, Candidate, CommentHealth, Identity, StagedArtifact};
use crate::scan::{matches_name, top_level, EntryKind};
use crate::stage::canonical_name;

impl StagedArtifact {
    /// Read a staged file. Files the extractor cannot parse still get a
    /// digest so byte-identity comparisons keep working.
    pub fn load(path: &Path, extractor: &dyn CandidateExtractor) -> Result<Self, MergeError> {
        if let Some(ex) = extractor.extract(path) {
            return Ok(Self {
                path: path.to_path_buf(),
                identity_key: ex.identity.key(),
                identity: ex.identity,
                content_digest: ex.content_digest,
                mtime: ex.mtime,
                comment_health: ex.comment_health,
            });
        }
        let metadata = std::fs::metadata(path).at("stat", path)?;
        Ok(Self {
            path: path.to_path_buf(),
            identity_key: None,
            identity: Identity::default(),
            content_digest: sha256_file(path)?,
            mtime: to_utc(metadata.modified().at("stat", path)?),
            comment_health: CommentHealth::default(),
        })
    }
}

/// Top-level staged files indexed by identity key and by opaque id.
#[derive(Debug, Default)]
pub struct StagedIndex {
    by_key: HashMap<String, StagedArtifact>,
    by_id: HashMap<String, StagedArtifact>,
}

impl StagedIndex {
    pub fn build(
        staging_root: &Path,
        include_set: &GlobSet,
        extractor: &dyn CandidateExtractor,
    ) -> Self {
        let mut index = Self::default();
        if !staging_root.is_dir() {
            return index;
        }
        for path in top_level(staging_root, EntryKind::File) {
            if !matches_name(include_set, &path) {
                continue;
            }
            match StagedArtifact::load(&path, extractor) {
                Ok(artifact) => index.insert(artifact),
                Err(e) => tracing::warn!(error = %e, "could not index staged file"),
            }
        }
        index
    }

    /// Newest file wins when two staged files claim the same identity.
    pub fn insert(&mut self, artifact: StagedArtifact) {
        if let Some(key) = artifact.identity_key.clone() {
            keep_newest(&mut self.by_key, key, artifact.clone());
        }
        if let Some(id) = artifact.identity.opaque_id.clone() {
            keep_newest(&mut self.by_id, id, artifact);
        }
    }

    pub fn lookup(&self, key: &str, opaque_id: Option<&str>) -> Option<&StagedArtifact> {
        self.by_key
            .get(key)
            .or_else(|| opaque_id.and_then(|id| self.by_id.get(id)))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }
}

fn keep_newest(map: &mut HashMap<String, StagedArtifact>, key: String, artifact: StagedArtifact) {
    match map.get(&key) {
        Some(prev) if prev.mtime >= artifact.mtime => {}
        _ => {
            map.insert(key, artifact);
        }
    }
}

/// Where the winner lives in staging, and what is there now.
///
/// Identity-key match first, then opaque-id match, then the canonical file
/// name (which may hold an unindexed file).
pub fn resolve_destination(
    index: &StagedIndex,
    winner: &Candidate,
    staging_root: &Path,
    extractor: &dyn CandidateExtractor,
) -> Result<(PathBuf, Option<StagedArtifact>), MergeError> {
    if let Some(found) = index.lookup(&winner.identity_key, winner.identity.opaque_id.as_deref()) {
        return Ok((found.path.clone(), Some(found.clone())));
    }
    let dest = staging_root.join(canonical_name(&winner.identity, &winner.path));
    if dest.is_file() {
        let artifact = StagedArtifact::load(&dest, extractor)?;
        return Ok((dest, Some(artifact)));
    }
    Ok((dest, None))
}

/// Action plus a short note explaining it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub action: Action,
    pub note: String,
}

impl Verdict {
    fn new(action: Action, note: impl Into<String>) -> Self {
        Self {
            action,
            note: note.into(),
        }
    }
}

/// Decide what to do with `winner` given the currently staged artifact.
///
/// Every `(winner, staged, blocked)` combination maps to exactly one action.
pub fn decide(winner: &Candidate, staged: Option<&StagedArtifact>, blocked: bool) -> Verdict {
    if blocked {
        return Verdict::new(Action::Blocked, "blocked: no eligible candidate");
    }
    let Some(staged) = staged else {
        return Verdict::new(Action::StageNew, "stage: not previously staged");
    };

    if let (Some(w), Some(s)) = (
        winner.identity.opaque_id.as_deref(),
        staged.identity.opaque_id.as_deref(),
    ) {
        if w != s {
            return Verdict::new(
                Action::Skip,
                format!("skip: identity mismatch (staged={} winner={})", s, w),
            );
        }
    }
    if let Some(k) = staged.identity_key.as_deref() {
        if k != winner.identity_key {
            return Verdict::new(
                Action::Skip,
                format!("skip: identity mismatch (staged={} winner={})", k, winner.identity_key),
            );
        }
    }

    if staged.content_digest == winner.content_digest {
        return Verdict::new(Action::Noop, "noop: identical to staged");
    }

    let w_rev = winner.identity.revision_or_floor();
    let s_rev = staged.identity.revision_or_floor();
    if s_rev > w_rev {
        return Verdict::new(
            Action::Skip,
            format!("skip: staged has higher revision {}>{}", s_rev, w_rev),
        );
    }
    if w_rev > s_rev {
        return Verdict::new(
            Action::Update,
            format!("update: higher revision {}>{}", w_rev, s_rev),
        );
    }

    if winner.comment_health.cmp_quality(&staged.comment_health).is_gt() {
        Verdict::new(Action::Update, "update: same revision, better comments")
    } else {
        Verdict::new(Action::Skip, "skip: same revision, staged comments at least as good")
    }
}

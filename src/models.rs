//! Core data models used throughout the merger.
//!
//! These types describe the candidate files observed in contributor folders,
//! the per-identity decisions made about them, and the staged/ledger state
//! they are compared against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

/// Identity parsed from a preview file. Immutable once extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Identity {
    pub opaque_id: Option<String>,
    pub display_name: Option<String>,
    pub revision_raw: Option<String>,
    pub revision_numeric: Option<f64>,
}

impl Identity {
    /// Grouping key: `ID:<id>` when an opaque id exists, else
    /// `NAME:<normalized name>`. `None` means the file cannot be grouped.
    pub fn key(&self) -> Option<String> {
        if let Some(id) = self.opaque_id.as_deref().filter(|s| !s.is_empty()) {
            return Some(format!("ID:{}", id));
        }
        self.display_name
            .as_deref()
            .map(normalize_name)
            .filter(|n| !n.is_empty())
            .map(|n| format!("NAME:{}", n))
    }

    /// Numeric revision with `-1` standing in for "absent".
    pub fn revision_or_floor(&self) -> f64 {
        self.revision_numeric.unwrap_or(-1.0)
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Counts of display-name-like fields inside an artifact.
///
/// Invariant: `no_space <= filled <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommentHealth {
    pub total: u32,
    pub filled: u32,
    pub no_space: u32,
}

impl CommentHealth {
    pub fn new(total: u32, filled: u32, no_space: u32) -> Self {
        debug_assert!(no_space <= filled && filled <= total);
        Self {
            total,
            filled,
            no_space,
        }
    }

    /// Has display-name fields, but none of them is usable.
    pub fn is_ineligible(&self) -> bool {
        self.total > 0 && self.no_space == 0
    }

    /// Exact comparison of `filled/total` (0 when `total == 0`) without
    /// going through floating point.
    pub fn cmp_fill_ratio(&self, other: &Self) -> Ordering {
        let (a_num, a_den) = self.ratio_parts();
        let (b_num, b_den) = other.ratio_parts();
        (a_num * b_den).cmp(&(b_num * a_den))
    }

    /// Comment quality ordering: `no_space` first, then fill ratio.
    pub fn cmp_quality(&self, other: &Self) -> Ordering {
        self.no_space
            .cmp(&other.no_space)
            .then_with(|| self.cmp_fill_ratio(other))
    }

    fn ratio_parts(&self) -> (u64, u64) {
        if self.total == 0 {
            (0, 1)
        } else {
            (u64::from(self.filled), u64::from(self.total))
        }
    }
}

/// Everything the extractor reports about one file.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub identity: Identity,
    pub content_digest: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub comment_health: CommentHealth,
}

/// One observed file in one contributor folder for the current run.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub identity_key: String,
    pub identity: Identity,
    pub owner: String,
    pub path: PathBuf,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub content_digest: String,
    pub comment_health: CommentHealth,
}

impl Candidate {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Path ordering used for the final deterministic tie-break.
    pub fn cmp_path(&self, other: &Self) -> Ordering {
        let a = self.path.to_string_lossy();
        let b = other.path.to_string_lossy();
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(&b))
    }
}

/// All candidates sharing one identity key within a run. Never empty.
#[derive(Debug, Clone)]
pub struct Group {
    pub identity_key: String,
    pub candidates: Vec<Candidate>,
}

/// Winner selection policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    #[default]
    PreferCommentsThenRevision,
    #[serde(alias = "prefer-exported")]
    PreferLatest,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::PreferCommentsThenRevision => "prefer-comments-then-revision",
            Policy::PreferLatest => "prefer-latest",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefer-comments-then-revision" => Ok(Policy::PreferCommentsThenRevision),
            "prefer-latest" | "prefer-exported" => Ok(Policy::PreferLatest),
            other => Err(format!(
                "unknown policy '{}'. Must be prefer-comments-then-revision or prefer-latest",
                other
            )),
        }
    }
}

/// What the run does with a group's winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    StageNew,
    Update,
    Noop,
    Skip,
    Blocked,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::StageNew => "stage-new",
            Action::Update => "update",
            Action::Noop => "noop",
            Action::Skip => "skip",
            Action::Blocked => "blocked",
        }
    }

    /// Whether this action writes to the staging folder.
    pub fn promotes(&self) -> bool {
        matches!(self, Action::StageNew | Action::Update)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the winner selector for one group.
#[derive(Debug, Clone)]
pub struct Selection {
    pub winner: Candidate,
    pub losers: Vec<Candidate>,
    pub reason: String,
    pub conflict: bool,
    /// Every candidate failed the eligibility gate; the winner is for
    /// reporting only.
    pub blocked: bool,
}

/// Selection plus staging action for one group.
#[derive(Debug, Clone)]
pub struct Decision {
    pub identity_key: String,
    pub winner: Candidate,
    pub losers: Vec<Candidate>,
    pub reason: String,
    pub conflict: bool,
    pub action: Action,
    pub destination: PathBuf,
}

/// The file currently promoted under an identity key.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub identity_key: Option<String>,
    pub identity: Identity,
    pub content_digest: String,
    pub mtime: DateTime<Utc>,
    pub comment_health: CommentHealth,
}

/// Last known winner per identity key, as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewState {
    pub preview_key: String,
    pub preview_guid: Option<String>,
    pub preview_name: Option<String>,
    pub revision_num: Option<f64>,
    pub sha256: Option<String>,
    pub staged_as: Option<String>,
    pub last_run_id: Option<String>,
    pub last_seen: Option<String>,
}

/// Fields that differ between this run's winner and the prior state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Change {
    pub name: bool,
    pub revision: bool,
    pub content: bool,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        !(self.name || self.revision || self.content)
    }

    /// `name+rev+content`, or `none` when nothing changed.
    pub fn label(&self) -> String {
        let mut tags = Vec::new();
        if self.name {
            tags.push("name");
        }
        if self.revision {
            tags.push("rev");
        }
        if self.content {
            tags.push("content");
        }
        if tags.is_empty() {
            "none".to_string()
        } else {
            tags.join("+")
        }
    }
}

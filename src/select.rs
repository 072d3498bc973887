//! Winner selection for one identity group.
//!
//! [`select`] is a pure function of the group's contents: input order never
//! changes the winner or the conflict flag.
//!
//! Order of evaluation:
//!
//! 1. Eligibility gate. A candidate whose display-name fields are all blank
//!    or contain whitespace is ineligible. If nobody is eligible the latest
//!    file is reported as winner and the group is blocked.
//! 2. Policy cascade over the eligible subset. For
//!    `prefer-comments-then-revision`: most no-space comments, highest
//!    numeric revision, best fill ratio, latest mtime. For `prefer-latest`:
//!    latest mtime only.
//! 3. Final tie: smallest path wins; `conflict` is raised when the tied
//!    files differ in content.

use std::cmp::Ordering;

use crate::models::{Candidate, Group, Policy, Selection};

pub fn select(group: &Group, policy: Policy) -> Selection {
    let all: Vec<&Candidate> = group.candidates.iter().collect();
    let eligible: Vec<&Candidate> = all
        .iter()
        .copied()
        .filter(|c| !c.comment_health.is_ineligible())
        .collect();

    if eligible.is_empty() {
        let latest = retain_max(all, |a, b| a.mtime.cmp(&b.mtime));
        let winner = smallest_path(&latest);
        return finish(
            group,
            winner,
            "all candidates ineligible (no usable display names); reporting only".to_string(),
            true,
            true,
        );
    }

    let excluded = group.candidates.len() - eligible.len();
    if eligible.len() == 1 {
        let reason = if excluded == 0 {
            "single candidate".to_string()
        } else {
            format!("only eligible candidate ({} ineligible)", excluded)
        };
        return finish(group, eligible[0], reason, false, false);
    }

    let mut trace = Vec::new();
    if excluded > 0 {
        trace.push(format!("{} ineligible excluded", excluded));
    }

    let (winner, conflict) = match policy {
        Policy::PreferCommentsThenRevision => comments_then_revision(eligible, &mut trace),
        Policy::PreferLatest => latest(eligible, &mut trace),
    };
    finish(group, winner, trace.join("; "), conflict, false)
}

/// Build a selection with an externally chosen winner (`--force-winner`).
/// The eligibility gate still applies to the forced file.
pub fn forced(group: &Group, winner: &Candidate) -> Selection {
    if winner.comment_health.is_ineligible() {
        return finish(
            group,
            winner,
            "forced winner is ineligible (no usable display names)".to_string(),
            true,
            true,
        );
    }
    finish(group, winner, "forced winner".to_string(), false, false)
}

fn comments_then_revision<'a>(
    mut tied: Vec<&'a Candidate>,
    trace: &mut Vec<String>,
) -> (&'a Candidate, bool) {
    tied = retain_max(tied, |a, b| {
        a.comment_health.no_space.cmp(&b.comment_health.no_space)
    });
    let ns = tied[0].comment_health.no_space;
    if tied.len() == 1 {
        trace.push(format!("most no-space comments={}", ns));
        return (tied[0], false);
    }
    trace.push(format!("no-space comments tied at {}", ns));

    if tied.iter().any(|c| c.identity.revision_numeric.is_some()) {
        tied = retain_max(tied, |a, b| {
            cmp_revision(a.identity.revision_numeric, b.identity.revision_numeric)
        });
        let rev = tied[0].identity.revision_numeric.unwrap_or(-1.0);
        if tied.len() == 1 {
            trace.push(format!("highest revision={}", rev));
            return (tied[0], false);
        }
        trace.push(format!("revision tied at {}", rev));
    } else {
        trace.push("no numeric revision".to_string());
    }

    tied = retain_max(tied, |a, b| a.comment_health.cmp_fill_ratio(&b.comment_health));
    let health = tied[0].comment_health;
    if tied.len() == 1 {
        trace.push(format!("best fill {}/{}", health.filled, health.total));
        return (tied[0], false);
    }
    trace.push(format!("fill tied at {}/{}", health.filled, health.total));

    latest(tied, trace)
}

fn latest<'a>(tied: Vec<&'a Candidate>, trace: &mut Vec<String>) -> (&'a Candidate, bool) {
    let tied = retain_max(tied, |a, b| a.mtime.cmp(&b.mtime));
    if tied.len() == 1 {
        trace.push("latest modification time".to_string());
        return (tied[0], false);
    }
    trace.push("modification time tied".to_string());

    let winner = smallest_path(&tied);
    let conflict = tied
        .iter()
        .any(|c| c.content_digest != winner.content_digest);
    if conflict {
        trace.push("different content; picked first path, needs review".to_string());
    } else {
        trace.push("identical content; picked first path".to_string());
    }
    (winner, conflict)
}

/// `None` sorts below every numeric revision.
fn cmp_revision(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Keep every item that compares equal to the maximum. `items` is non-empty.
fn retain_max<'a, F>(items: Vec<&'a Candidate>, cmp: F) -> Vec<&'a Candidate>
where
    F: Fn(&Candidate, &Candidate) -> Ordering,
{
    let Some(best) = items.iter().copied().max_by(|a, b| cmp(a, b)) else {
        return items;
    };
    items
        .into_iter()
        .filter(|c| cmp(c, best) == Ordering::Equal)
        .collect()
}

fn smallest_path<'a>(items: &[&'a Candidate]) -> &'a Candidate {
    items
        .iter()
        .copied()
        .min_by(|a, b| a.cmp_path(b))
        .unwrap_or(items[0])
}

fn finish(
    group: &Group,
    winner: &Candidate,
    reason: String,
    conflict: bool,
    blocked: bool,
) -> Selection {
    let mut losers: Vec<Candidate> = group
        .candidates
        .iter()
        .filter(|c| c.path != winner.path)
        .cloned()
        .collect();
    losers.sort_by(|a, b| a.cmp_path(b));
    Selection {
        winner: winner.clone(),
        losers,
        reason,
        conflict,
        blocked,
    }
}

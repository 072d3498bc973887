//! Run summary: the JSON document written after every run and the table
//! printed to stdout.
//!
//! The JSON file is the machine-readable record operators look at before
//! acting on a non-zero exit code. It is written in dry-run as well.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::models::{Action, Decision, Policy};
use crate::sweep::SweepOutcome;

/// One row per identity group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupRow {
    pub key: String,
    pub name: Option<String>,
    pub revision: Option<String>,
    pub winner: PathBuf,
    pub owner: String,
    pub destination: PathBuf,
    pub action: Action,
    pub reason: String,
    pub conflict: bool,
    /// `name+rev+content`, `none`, or `new` for a key never seen before.
    pub change: String,
    pub losers: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    /// Promotion failure for this key, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GroupRow {
    pub fn new(decision: &Decision, change: String) -> Self {
        Self {
            key: decision.identity_key.clone(),
            name: decision.winner.identity.display_name.clone(),
            revision: decision.winner.identity.revision_raw.clone(),
            winner: decision.winner.path.clone(),
            owner: decision.winner.owner.clone(),
            destination: decision.destination.clone(),
            action: decision.action,
            reason: decision.reason.clone(),
            conflict: decision.conflict,
            change,
            losers: decision.losers.iter().map(|c| c.path.clone()).collect(),
            backup: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Absent in dry-run, which records nothing in the ledger.
    pub run_id: Option<String>,
    pub mode: &'static str,
    pub policy: Policy,
    pub started: String,
    pub candidates: usize,
    /// Files dropped because they had no usable identity.
    pub dropped: Vec<PathBuf>,
    pub groups: Vec<GroupRow>,
    pub sweep: Option<SweepOutcome>,
}

impl RunReport {
    pub fn conflicts(&self) -> usize {
        self.groups.iter().filter(|g| g.conflict).count()
    }

    pub fn failures(&self) -> usize {
        self.groups.iter().filter(|g| g.error.is_some()).count()
    }

    pub fn count(&self, action: Action) -> usize {
        self.groups.iter().filter(|g| g.action == action).count()
    }

    /// `2` when any group needs review, else `0`.
    pub fn exit_code(&self) -> u8 {
        if self.conflicts() > 0 {
            2
        } else {
            0
        }
    }
}

pub fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run summary: {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote run summary");
    Ok(())
}

pub fn print_summary(report: &RunReport) {
    println!(
        "pmerge {}  policy={}  run={}",
        report.mode,
        report.policy,
        report.run_id.as_deref().unwrap_or("-")
    );
    println!();

    if !report.groups.is_empty() {
        println!(
            "  {:<40} {:<10} {:<8} {:<18} {}",
            "KEY", "ACTION", "CONFLICT", "CHANGE", "REASON"
        );
        println!("  {}", "-".repeat(96));
        for g in &report.groups {
            println!(
                "  {:<40} {:<10} {:<8} {:<18} {}",
                truncate(&g.key, 40),
                g.action.as_str(),
                if g.conflict { "yes" } else { "" },
                g.change,
                g.reason
            );
            if let Some(err) = &g.error {
                println!("  {:<40} failed: {}", "", err);
            }
        }
        println!();
    }

    println!("  Candidates:  {}", report.candidates);
    println!("  Dropped:     {}", report.dropped.len());
    println!("  Groups:      {}", report.groups.len());
    println!(
        "  Actions:     stage-new={} update={} noop={} skip={} blocked={}",
        report.count(Action::StageNew),
        report.count(Action::Update),
        report.count(Action::Noop),
        report.count(Action::Skip),
        report.count(Action::Blocked)
    );
    println!("  Conflicts:   {}", report.conflicts());
    if report.failures() > 0 {
        println!("  Failures:    {}", report.failures());
    }
    if let Some(sweep) = &report.sweep {
        println!(
            "  Sweep:       moved={} kept={} failed={}",
            sweep.moved,
            sweep.kept,
            sweep.failed.len()
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(action: Action, conflict: bool) -> GroupRow {
        GroupRow {
            key: "ID:g".into(),
            name: Some("Arch".into()),
            revision: Some("2".into()),
            winner: PathBuf::from("/in/alice/arch.lorprev"),
            owner: "alice".into(),
            destination: PathBuf::from("/stage/Arch__g.lorprev"),
            action,
            reason: "single candidate".into(),
            conflict,
            change: "new".into(),
            losers: vec![],
            backup: None,
            error: None,
        }
    }

    fn report(groups: Vec<GroupRow>) -> RunReport {
        RunReport {
            run_id: None,
            mode: "dry-run",
            policy: Policy::default(),
            started: "2025-09-01T08:00:00+00:00".into(),
            candidates: groups.len(),
            dropped: vec![],
            groups,
            sweep: None,
        }
    }

    #[test]
    fn exit_code_reflects_conflicts() {
        assert_eq!(report(vec![row(Action::Noop, false)]).exit_code(), 0);
        let r = report(vec![row(Action::Noop, false), row(Action::Blocked, true)]);
        assert_eq!(r.exit_code(), 2);
        assert_eq!(r.count(Action::Blocked), 1);
    }

    #[test]
    fn json_uses_kebab_case_names() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("reports/summary.json");
        write_json(&report(vec![row(Action::StageNew, false)]), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["policy"], "prefer-comments-then-revision");
        assert_eq!(value["groups"][0]["action"], "stage-new");
        assert!(value["groups"][0].get("error").is_none());
        assert!(value["run_id"].is_null());
    }

    #[test]
    fn truncate_long_keys() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}

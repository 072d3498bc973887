//! One reconciliation run, end to end.
//!
//! ```text
//! probe reports ─▶ run lock ─▶ scan ─▶ group ─▶ per group:
//!     select ─▶ resolve destination ─▶ decide ─▶ promote ─▶ record
//! ─▶ sweep ─▶ run summary
//! ```
//!
//! Dry-run executes the same scan, selection and decisions but never takes
//! the lock, promotes, sweeps, or writes to the ledger.

use anyhow::{Context, Result};
use chrono::Local;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::config::{Config, ForceWinner};
use crate::decide::{decide, resolve_destination, StagedIndex};
use crate::error::MergeError;
use crate::extract::CandidateExtractor;
use crate::group::group_by_key;
use crate::ledger::{self, Ledger};
use crate::models::{Action, Candidate, Decision, Group, Policy, Selection, StagedArtifact};
use crate::preflight::{probe_reports, RunLock};
use crate::progress::{ProgressMode, RunProgressEvent};
use crate::report::{self, GroupRow, RunReport};
use crate::scan::{build_globset, scan_contributors};
use crate::select::{forced, select};
use crate::stage::{canonical_name, promote};
use crate::sweep::sweep;

/// Per-invocation switches layered over the configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub apply: bool,
    /// Overrides `merge.policy`.
    pub policy: Option<Policy>,
    /// Added to `merge.force_winners`.
    pub force_winners: Vec<String>,
    pub progress: ProgressMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            apply: false,
            policy: None,
            force_winners: Vec::new(),
            progress: ProgressMode::Off,
        }
    }
}

pub async fn run_reconcile(
    config: &Config,
    options: &RunOptions,
    extractor: &dyn CandidateExtractor,
) -> Result<RunReport> {
    let started = Local::now();
    let policy = options.policy.unwrap_or(config.merge.policy);
    let apply = options.apply;
    let progress = options.progress.reporter();

    let mut force_winners = config.force_winners()?;
    for spec in &options.force_winners {
        force_winners.push(ForceWinner::parse(spec)?);
    }

    // Nothing below this point runs if a report target is held open.
    probe_reports(&config.reports.targets())?;
    let _lock = if apply && config.merge.lock {
        Some(RunLock::acquire(&config.paths.lock_path())?)
    } else {
        None
    };

    tracing::info!(
        mode = if apply { "apply" } else { "dry-run" },
        policy = %policy,
        "run started"
    );

    if apply {
        ensure_contributors(config);
    }

    progress.report(RunProgressEvent::Scanning {
        input_root: config.paths.input_root.display().to_string(),
    });
    let scanned = scan_contributors(
        &config.paths.input_root,
        &config.merge.include_globs,
        extractor,
    )?;
    let candidate_count = scanned.candidates.len();

    let ledger = if apply {
        Some(
            Ledger::open(&config.paths.ledger)
                .await
                .with_context(|| format!("Failed to open ledger {}", config.paths.ledger.display()))?,
        )
    } else {
        Ledger::open_read_only(&config.paths.ledger)
            .await
            .with_context(|| format!("Failed to read ledger {}", config.paths.ledger.display()))?
    };

    let run_id = match (&ledger, apply) {
        (Some(l), true) => {
            let id = l.begin_run(policy, started).await?;
            l.record_observations(&id, &scanned.candidates).await?;
            Some(id)
        }
        _ => None,
    };

    let include_set = build_globset(&config.merge.include_globs)?;
    let staging_root = &config.paths.staging_root;
    let index = StagedIndex::build(staging_root, &include_set, extractor);
    tracing::debug!(staged = index.len(), "indexed staging folder");

    let groups = group_by_key(scanned.candidates);
    let total = groups.len() as u64;
    let mut rows = Vec::with_capacity(groups.len());
    let mut keep: HashSet<String> = HashSet::new();
    // Destination (lowercased file name) -> identity key that claimed it this run.
    let mut claimed: HashMap<String, String> = HashMap::new();

    for (i, group) in groups.iter().enumerate() {
        let selection = match forced_candidate(group, &force_winners) {
            Some(c) => forced(group, c),
            None => select(group, policy),
        };

        let (destination, staged, lookup_error) =
            match resolve_destination(&index, &selection.winner, staging_root, extractor) {
                Ok((dest, staged)) => (dest, staged, None),
                Err(e) => {
                    tracing::warn!(key = %group.identity_key, error = %e, "could not read staged file");
                    let dest =
                        staging_root.join(canonical_name(&selection.winner.identity, &selection.winner.path));
                    (dest, None, Some(e))
                }
            };
        let dest_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        keep.insert(dest_name.clone());
        let claimed_by = match claimed.get(&dest_name) {
            Some(owner) if owner != &group.identity_key => Some(owner.clone()),
            Some(_) => None,
            None => {
                claimed.insert(dest_name, group.identity_key.clone());
                None
            }
        };

        let mut decision = build_decision(group, selection, destination, staged.as_ref());
        if let Some(owner) = claimed_by {
            if decision.action.promotes() {
                decision.action = Action::Skip;
            }
            decision.reason = format!("{}; destination already claimed by {}", decision.reason, owner);
        }
        if let Some(e) = &lookup_error {
            // Unknown staged content is never overwritten.
            if decision.action.promotes() {
                decision.action = Action::Skip;
            }
            decision.reason = format!("{}; staged file unreadable: {}", decision.reason, e);
        }

        let prior = match &ledger {
            Some(l) => l.prior_state(&group.identity_key).await?,
            None => None,
        };
        let change = ledger::change_since(prior.as_ref(), &decision.winner)
            .map(|c| c.label())
            .unwrap_or_else(|| "new".to_string());

        let mut row_backup = None;
        let mut row_error = None;
        if apply && decision.action.promotes() {
            match promote(&decision.winner, &decision.destination, Local::now()) {
                Ok(done) => {
                    tracing::info!(
                        key = %decision.identity_key,
                        action = %decision.action.as_str(),
                        path = %done.destination.display(),
                        "promoted"
                    );
                    row_backup = done.backup;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(key = %decision.identity_key, error = %e, "promotion failed");
                    decision.reason = format!("{}; promotion failed: {}", decision.reason, e);
                    row_error = Some(e.to_string());
                }
            }
        } else {
            tracing::debug!(
                key = %decision.identity_key,
                action = %decision.action.as_str(),
                conflict = decision.conflict,
                "decided"
            );
        }

        if let (Some(l), Some(id)) = (&ledger, &run_id) {
            l.record_decision(id, &decision).await?;
            if decision.action != Action::Blocked && row_error.is_none() {
                l.upsert_preview_state(
                    id,
                    &decision.identity_key,
                    &decision.winner,
                    &decision.destination,
                    Local::now(),
                )
                .await?;
            }
        }

        let mut row = GroupRow::new(&decision, change);
        row.backup = row_backup;
        row.error = row_error;
        rows.push(row);

        progress.report(RunProgressEvent::Deciding {
            key: group.identity_key.clone(),
            n: i as u64 + 1,
            total,
        });
    }

    let sweep_outcome = if apply {
        progress.report(RunProgressEvent::Sweeping);
        match sweep(
            staging_root,
            &config.paths.archive_root(),
            &keep,
            Local::now().date_naive(),
        ) {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "archive sweep skipped");
                None
            }
        }
    } else {
        None
    };

    if let Some(l) = ledger {
        l.close().await;
    }

    let report = RunReport {
        run_id,
        mode: if apply { "apply" } else { "dry-run" },
        policy,
        started: ledger::iso_local(started),
        candidates: candidate_count,
        dropped: scanned.dropped,
        groups: rows,
        sweep: sweep_outcome,
    };

    if let Some(path) = &config.reports.json {
        report::write_json(&report, path)?;
    }

    tracing::info!(
        groups = report.groups.len(),
        conflicts = report.conflicts(),
        failures = report.failures(),
        "run finished"
    );
    Ok(report)
}

/// First candidate of the group named by a forced-winner entry.
fn forced_candidate<'a>(group: &'a Group, force_winners: &[ForceWinner]) -> Option<&'a Candidate> {
    if force_winners.is_empty() {
        return None;
    }
    let mut ordered: Vec<&Candidate> = group.candidates.iter().collect();
    ordered.sort_by(|a, b| a.cmp_path(b));
    ordered.into_iter().find(|c| {
        force_winners
            .iter()
            .any(|fw| fw.matches(&group.identity_key, &c.path))
    })
}

fn build_decision(
    group: &Group,
    selection: Selection,
    destination: PathBuf,
    staged: Option<&StagedArtifact>,
) -> Decision {
    let verdict = decide(&selection.winner, staged, selection.blocked);
    Decision {
        identity_key: group.identity_key.clone(),
        reason: format!("{}; {}", selection.reason, verdict.note),
        conflict: selection.conflict,
        action: verdict.action,
        winner: selection.winner,
        losers: selection.losers,
        destination,
    }
}

/// Create a drop folder per configured contributor. Failures are logged.
fn ensure_contributors(config: &Config) {
    for name in &config.merge.ensure_contributors {
        let dir = config.paths.input_root.join(name);
        if dir.is_dir() {
            continue;
        }
        match std::fs::create_dir_all(&dir) {
            Ok(()) => tracing::info!(path = %dir.display(), "created contributor folder"),
            Err(e) => {
                let err = MergeError::io("create", &dir, e);
                tracing::warn!(error = %err, "could not create contributor folder");
            }
        }
    }
}

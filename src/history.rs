//! Read-only views of the audit ledger: `pmerge history` and `pmerge state`.

use anyhow::Result;

use crate::config::Config;
use crate::ledger::Ledger;

/// Print the most recent runs with their observation, decision and conflict
/// counts.
pub async fn run_history(config: &Config, limit: i64) -> Result<()> {
    let Some(ledger) = Ledger::open_read_only(&config.paths.ledger).await? else {
        println!("No ledger at {}", config.paths.ledger.display());
        return Ok(());
    };

    let size = std::fs::metadata(&config.paths.ledger)
        .map(|m| m.len())
        .unwrap_or(0);
    let runs = ledger.recent_runs(limit).await?;

    println!("Preview Merger: Run History");
    println!("===========================");
    println!();
    println!("  Ledger:  {}", config.paths.ledger.display());
    println!("  Size:    {}", format_bytes(size));
    println!();

    if runs.is_empty() {
        println!("  No runs recorded.");
    } else {
        println!(
            "  {:<34} {:<26} {:<30} {:>6} {:>6} {:>9}",
            "RUN", "STARTED", "POLICY", "FILES", "GROUPS", "CONFLICTS"
        );
        println!("  {}", "-".repeat(116));
        for r in &runs {
            println!(
                "  {:<34} {:<26} {:<30} {:>6} {:>6} {:>9}",
                r.run_id, r.started, r.policy, r.observations, r.decisions, r.conflicts
            );
        }
    }
    println!();

    ledger.close().await;
    Ok(())
}

/// Print the last known winner per identity key, or one key's row.
pub async fn run_state(config: &Config, key: Option<&str>) -> Result<()> {
    let Some(ledger) = Ledger::open_read_only(&config.paths.ledger).await? else {
        println!("No ledger at {}", config.paths.ledger.display());
        return Ok(());
    };

    let states: Vec<_> = match key {
        Some(k) => ledger.prior_state(k).await?.into_iter().collect(),
        None => ledger.all_states().await?,
    };

    if states.is_empty() {
        match key {
            Some(k) => println!("No state recorded for {}", k),
            None => println!("No state recorded."),
        }
    }
    for s in &states {
        println!("{}", s.preview_key);
        println!("  name:      {}", s.preview_name.as_deref().unwrap_or("-"));
        println!(
            "  revision:  {}",
            s.revision_num
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        println!("  sha256:    {}", s.sha256.as_deref().unwrap_or("-"));
        println!("  staged as: {}", s.staged_as.as_deref().unwrap_or("-"));
        println!("  last run:  {}", s.last_run_id.as_deref().unwrap_or("-"));
        println!("  last seen: {}", s.last_seen.as_deref().unwrap_or("-"));
    }

    ledger.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

//! # Preview Merger CLI (`pmerge`)
//!
//! ## Usage
//!
//! ```bash
//! pmerge --config ./config/pmerge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pmerge init` | Create the ledger database and its tables |
//! | `pmerge run` | Decide winners and report (dry-run) |
//! | `pmerge run --apply` | Promote winners, archive superseded files, record the run |
//! | `pmerge history` | Recent runs with counts |
//! | `pmerge state [KEY]` | Last recorded winner per identity key |
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | `0` | Success, no conflicts |
//! | `2` | Run completed, at least one group needs review |
//! | `4` | A report target or the run lock was held; nothing was changed |
//! | `1` | Any other fatal error |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use preview_merger::config::{self, Config};
use preview_merger::error::MergeError;
use preview_merger::extract::XmlPreviewExtractor;
use preview_merger::models::Policy;
use preview_merger::progress::ProgressMode;
use preview_merger::reconcile::{run_reconcile, RunOptions};
use preview_merger::telemetry::{self, LogFormat};
use preview_merger::{history, migrate, report};

/// Preview Merger: pick one authoritative copy of every preview across
/// contributor folders and promote it into the shared staging folder.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pmerge.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "pmerge", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pmerge.toml")]
    config: PathBuf,

    /// Debug-level logging (ignored when RUST_LOG is set).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log output format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the ledger schema. Safe to run repeatedly.
    Init,

    /// Run one reconciliation.
    ///
    /// Without `--apply` nothing on disk changes: the run scans, selects and
    /// decides, then prints and writes the summary.
    Run {
        /// Promote winners, sweep the staging folder and record the run.
        #[arg(long)]
        apply: bool,

        /// Selection policy: `prefer-comments-then-revision` or
        /// `prefer-latest`. Overrides `merge.policy`.
        #[arg(long)]
        policy: Option<String>,

        /// Force a winner: `PATH` or `KEY=PATH`. May be repeated.
        #[arg(long = "force-winner")]
        force_winner: Vec<String>,

        /// Progress on stderr: `off`, `human` or `json`. Defaults to
        /// `human` on a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show recent runs.
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show the last recorded winner for one key, or for all keys.
    State { key: Option<String> },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.log_format);

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let preflight = e
                .chain()
                .filter_map(|cause| cause.downcast_ref::<MergeError>())
                .any(MergeError::is_preflight);
            if preflight {
                ExitCode::from(4)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let cfg: Config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Ledger initialized at {}", cfg.paths.ledger.display());
        }
        Commands::Run {
            apply,
            policy,
            force_winner,
            progress,
        } => {
            let policy = policy
                .map(|p| p.parse::<Policy>().map_err(anyhow::Error::msg))
                .transpose()?;
            let progress = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(value) => match ProgressMode::parse(value) {
                    Some(mode) => mode,
                    None => bail!("Unknown progress mode: {} (use off, human or json)", value),
                },
            };
            let options = RunOptions {
                apply,
                policy,
                force_winners: force_winner,
                progress,
            };
            let summary = run_reconcile(&cfg, &options, &XmlPreviewExtractor).await?;
            report::print_summary(&summary);
            return Ok(summary.exit_code());
        }
        Commands::History { limit } => {
            history::run_history(&cfg, limit).await?;
        }
        Commands::State { key } => {
            history::run_state(&cfg, key.as_deref()).await?;
        }
    }

    Ok(0)
}

//! # Preview Merger
//!
//! Reconciles per-contributor copies of preview files into one shared
//! staging folder.
//!
//! Every contributor keeps their own copies under `input_root/<name>/`. On
//! each run the merger groups copies by identity, picks exactly one winner
//! per identity with a deterministic tie-break cascade, promotes it into
//! `staging_root` (backing up whatever it replaces), archives staged files
//! that no longer win, and records everything in a SQLite audit ledger so
//! the next run can report what changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Contributors │──▶│ Scan+Group  │──▶│ Select+Decide│──▶│  Staging  │
//! │ input_root/* │   │  (extract)  │   │  per group   │   │ + archive │
//! └──────────────┘   └─────────────┘   └──────┬───────┘   └───────────┘
//!                                             │
//!                                             ▼
//!                                      ┌─────────────┐
//!                                      │   Ledger    │
//!                                      │  (SQLite)   │
//!                                      └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pmerge init                   # create the ledger
//! pmerge run                    # dry-run: decide and report only
//! pmerge run --apply            # promote, archive, record
//! pmerge history --limit 5
//! pmerge state "ID:7f3c2a10-..."
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error kinds and the fatal/non-fatal split |
//! | [`models`] | Core data types |
//! | [`extract`] | Candidate extractor trait and the XML preview extractor |
//! | [`scan`] | Contributor folder scanner |
//! | [`group`] | Grouping by identity key |
//! | [`select`] | Winner selection |
//! | [`decide`] | Staged index and stage/update/noop/skip/blocked decisions |
//! | [`stage`] | Promotion with backup-before-overwrite |
//! | [`sweep`] | Archive sweep of superseded staged files |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`ledger`] | Audit ledger and cross-run change labels |
//! | [`preflight`] | Report lock probe and run lock |
//! | [`progress`] | Progress reporting on stderr |
//! | [`reconcile`] | One full run |
//! | [`report`] | JSON run summary and stdout table |
//! | [`history`] | Ledger read commands |
//! | [`telemetry`] | Logging setup |

pub mod config;
pub mod db;
pub mod decide;
pub mod error;
pub mod extract;
pub mod group;
pub mod history;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod preflight;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod scan;
pub mod select;
pub mod stage;
pub mod sweep;
pub mod telemetry;

//! Audit ledger: runs, per-file observations, per-group decisions and the
//! last known winner per identity.
//!
//! Everything is append-only except `preview_state`, which holds exactly one
//! row per identity key and is overwritten each run. It exists only so the
//! next run can say what changed.

use anyhow::Result;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::db;
use crate::error::MergeError;
use crate::migrate;
use crate::models::{Candidate, Change, Decision, Policy, PreviewState};

pub struct Ledger {
    pool: SqlitePool,
}

/// Summary row for one recorded run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub started: String,
    pub policy: String,
    pub observations: i64,
    pub decisions: i64,
    pub conflicts: i64,
}

impl Ledger {
    /// Open (creating if needed) a writable ledger and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an existing ledger for reads only; `None` if there is none yet.
    pub async fn open_read_only(path: &Path) -> Result<Option<Self>> {
        Ok(db::connect_read_only(path)
            .await?
            .map(|pool| Self { pool }))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn begin_run(
        &self,
        policy: Policy,
        started: DateTime<Local>,
    ) -> Result<String, MergeError> {
        let run_id = Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO runs (run_id, started, policy) VALUES (?, ?, ?)")
            .bind(&run_id)
            .bind(iso_local(started))
            .bind(policy.as_str())
            .execute(&self.pool)
            .await?;
        Ok(run_id)
    }

    pub async fn record_observation(
        &self,
        run_id: &str,
        candidate: &Candidate,
    ) -> Result<(), MergeError> {
        self.record_observations(run_id, std::slice::from_ref(candidate))
            .await
    }

    /// Record every candidate of a run in one transaction.
    pub async fn record_observations(
        &self,
        run_id: &str,
        candidates: &[Candidate],
    ) -> Result<(), MergeError> {
        let mut tx = self.pool.begin().await?;
        for c in candidates {
            sqlx::query(
                r#"
                INSERT INTO file_observations (run_id, user, path, file_name, preview_key, preview_guid, preview_name, revision_raw, revision_num, file_size, exported, sha256)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(&c.owner)
            .bind(c.path.to_string_lossy().to_string())
            .bind(c.file_name())
            .bind(&c.identity_key)
            .bind(&c.identity.opaque_id)
            .bind(&c.identity.display_name)
            .bind(&c.identity.revision_raw)
            .bind(c.identity.revision_numeric)
            .bind(c.size as i64)
            .bind(exported_local(c.mtime))
            .bind(&c.content_digest)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_decision(
        &self,
        run_id: &str,
        decision: &Decision,
    ) -> Result<(), MergeError> {
        sqlx::query(
            r#"
            INSERT INTO staging_decisions (run_id, preview_key, winner_path, staged_as, decision_reason, conflict, action)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(&decision.identity_key)
        .bind(decision.winner.path.to_string_lossy().to_string())
        .bind(decision.destination.to_string_lossy().to_string())
        .bind(&decision.reason)
        .bind(i64::from(decision.conflict))
        .bind(decision.action.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn prior_state(&self, key: &str) -> Result<Option<PreviewState>, MergeError> {
        let row = sqlx::query(
            "SELECT preview_key, preview_guid, preview_name, revision_num, sha256, staged_as, last_run_id, last_seen \
             FROM preview_state WHERE preview_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| state_from_row(&r)))
    }

    pub async fn all_states(&self) -> Result<Vec<PreviewState>, MergeError> {
        let rows = sqlx::query(
            "SELECT preview_key, preview_guid, preview_name, revision_num, sha256, staged_as, last_run_id, last_seen \
             FROM preview_state ORDER BY preview_key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(state_from_row).collect())
    }

    pub async fn upsert_preview_state(
        &self,
        run_id: &str,
        key: &str,
        winner: &Candidate,
        staged_as: &Path,
        seen: DateTime<Local>,
    ) -> Result<(), MergeError> {
        sqlx::query(
            r#"
            INSERT INTO preview_state (preview_key, preview_guid, preview_name, revision_num, sha256, staged_as, last_run_id, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(preview_key) DO UPDATE SET
                preview_guid = excluded.preview_guid,
                preview_name = excluded.preview_name,
                revision_num = excluded.revision_num,
                sha256 = excluded.sha256,
                staged_as = excluded.staged_as,
                last_run_id = excluded.last_run_id,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(key)
        .bind(&winner.identity.opaque_id)
        .bind(&winner.identity.display_name)
        .bind(winner.identity.revision_numeric)
        .bind(&winner.content_digest)
        .bind(staged_as.to_string_lossy().to_string())
        .bind(run_id)
        .bind(iso_local(seen))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunSummary>, MergeError> {
        let rows = sqlx::query(
            r#"
            SELECT
                r.run_id,
                r.started,
                r.policy,
                (SELECT COUNT(*) FROM file_observations o WHERE o.run_id = r.run_id) AS observations,
                (SELECT COUNT(*) FROM staging_decisions d WHERE d.run_id = r.run_id) AS decisions,
                (SELECT COUNT(*) FROM staging_decisions d WHERE d.run_id = r.run_id AND d.conflict = 1) AS conflicts
            FROM runs r
            ORDER BY r.started DESC, r.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RunSummary {
                run_id: row.get("run_id"),
                started: row.get("started"),
                policy: row.get("policy"),
                observations: row.get("observations"),
                decisions: row.get("decisions"),
                conflicts: row.get("conflicts"),
            })
            .collect())
    }

    /// `(preview_key, action)` for every decision recorded in a run.
    pub async fn decisions_for_run(&self, run_id: &str) -> Result<Vec<(String, String)>, MergeError> {
        let rows = sqlx::query(
            "SELECT preview_key, action FROM staging_decisions WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("preview_key"), r.get("action")))
            .collect())
    }
}

fn state_from_row(row: &sqlx::sqlite::SqliteRow) -> PreviewState {
    PreviewState {
        preview_key: row.get("preview_key"),
        preview_guid: row.get("preview_guid"),
        preview_name: row.get("preview_name"),
        revision_num: row.get("revision_num"),
        sha256: row.get("sha256"),
        staged_as: row.get("staged_as"),
        last_run_id: row.get("last_run_id"),
        last_seen: row.get("last_seen"),
    }
}

/// Compare this run's winner with the last recorded winner. `None` when the
/// identity has never been recorded.
pub fn change_since(prior: Option<&PreviewState>, winner: &Candidate) -> Option<Change> {
    let prior = prior?;
    Some(Change {
        name: winner.identity.display_name.as_deref().unwrap_or("")
            != prior.preview_name.as_deref().unwrap_or(""),
        revision: winner.identity.revision_or_floor() != prior.revision_num.unwrap_or(-1.0),
        content: prior.sha256.as_deref() != Some(winner.content_digest.as_str()),
    })
}

/// Local, offset-aware ISO timestamp, e.g. `2025-08-31T08:25:33-05:00`.
pub fn iso_local(t: DateTime<Local>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// File modification time in local time, e.g. `2025-08-31 08:25:33-0500`.
pub fn exported_local(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S%z")
        .to_string()
}

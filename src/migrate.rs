use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the ledger tables and indexes. Safe to run on every open.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Create runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            started TEXT NOT NULL,
            policy TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per candidate file per run
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            user TEXT,
            path TEXT,
            file_name TEXT,
            preview_key TEXT,
            preview_guid TEXT,
            preview_name TEXT,
            revision_raw TEXT,
            revision_num REAL,
            file_size INTEGER,
            exported TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per identity group per run
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_decisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            preview_key TEXT NOT NULL,
            winner_path TEXT,
            staged_as TEXT,
            decision_reason TEXT,
            conflict INTEGER DEFAULT 0,
            action TEXT,
            FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Last winner per identity, overwritten every run
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS preview_state (
            preview_key TEXT PRIMARY KEY,
            preview_guid TEXT,
            preview_name TEXT,
            revision_num REAL,
            sha256 TEXT,
            staged_as TEXT,
            last_run_id TEXT,
            last_seen TEXT,
            FOREIGN KEY (last_run_id) REFERENCES runs(run_id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_obs_run_id ON file_observations(run_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_obs_preview_guid ON file_observations(preview_guid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_obs_sha256 ON file_observations(sha256)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_run_id ON staging_decisions(run_id)")
        .execute(pool)
        .await?;

    Ok(())
}

//! Database initialization
//!
//! Creates the relational store on first run and applies the idempotent
//! schema bootstrap. External consumers (query API, indexer) read these
//! tables; only the persistence coordinator writes them.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc creates the database file if it doesn't exist
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_and_bootstrap(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests. Single connection: each sqlite memory
/// connection is its own database, so a larger pool would shear state.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;
    configure_and_bootstrap(&pool).await?;
    Ok(pool)
}

async fn configure_and_bootstrap(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer, needed for the
    // multi-worker pipeline committing while operators query the log
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_aggregates_table(pool).await?;
    create_aggregate_versions_table(pool).await?;
    create_processing_log_tables(pool).await?;
    Ok(())
}

/// One row per entity key: the reconstructed aggregate state as canonical
/// JSON plus the per-kind watermarks used for ordering decisions.
async fn create_aggregates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregates (
            entity_key TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            data TEXT NOT NULL,
            watermarks TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_type ON aggregates(entity_type)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Amendment/version lineage. Supersession links form a forest: each version
/// names at most one predecessor and is never deleted, only marked inactive.
async fn create_aggregate_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregate_versions (
            entity_key TEXT NOT NULL,
            version TEXT NOT NULL,
            supersedes TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            PRIMARY KEY (entity_key, version)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Append-only audit log plus a key link table for per-entity queries.
/// Existing rows are never updated or deleted.
async fn create_processing_log_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_path TEXT NOT NULL,
            parser TEXT NOT NULL,
            entity_keys TEXT NOT NULL,
            outcome TEXT NOT NULL,
            reason TEXT,
            source_hash TEXT,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_processing_log_recorded ON processing_log(recorded_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_log_keys (
            record_id INTEGER NOT NULL REFERENCES processing_log(id),
            entity_key TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_plk_entity_key ON processing_log_keys(entity_key)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        // Second bootstrap over the same pool must not fail
        configure_and_bootstrap(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(names.contains(&"aggregates"));
        assert!(names.contains(&"aggregate_versions"));
        assert!(names.contains(&"processing_log"));
        assert!(names.contains(&"processing_log_keys"));
    }
}

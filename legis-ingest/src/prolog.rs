//! Processing log
//!
//! Durable, append-only record of every file's classification and outcome.
//! Records are written inside the persistence coordinator's transaction
//! when aggregates are committed, or standalone for files that never reach
//! a commit (unrecognized type, parse failure). Existing records are never
//! mutated or deleted.

use chrono::{DateTime, Utc};
use legis_common::db::ProcessingLogRow;
use legis_common::{ProcessingRecord, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};

/// Append a record within an open transaction
pub async fn append_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ProcessingRecord,
) -> Result<i64> {
    let keys_json = serde_json::to_string(&record.entity_keys)
        .map_err(|e| legis_common::Error::Internal(format!("Serialize entity keys: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO processing_log
            (source_path, parser, entity_keys, outcome, reason, source_hash, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.source_path)
    .bind(&record.parser)
    .bind(&keys_json)
    .bind(&record.outcome)
    .bind(&record.reason)
    .bind(&record.source_hash)
    .bind(record.recorded_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    let record_id = result.last_insert_rowid();
    for key in &record.entity_keys {
        sqlx::query("INSERT INTO processing_log_keys (record_id, entity_key) VALUES (?, ?)")
            .bind(record_id)
            .bind(key)
            .execute(&mut **tx)
            .await?;
    }
    Ok(record_id)
}

/// Append a record outside any aggregate commit (classification and parse
/// failures touch no aggregate rows)
pub async fn append(pool: &SqlitePool, record: &ProcessingRecord) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = append_in_tx(&mut tx, record).await?;
    tx.commit().await?;
    Ok(id)
}

/// All records at or after the given timestamp (incremental monitoring)
pub async fn records_since(
    pool: &SqlitePool,
    since: DateTime<Utc>,
) -> Result<Vec<ProcessingLogRow>> {
    let rows = sqlx::query_as::<_, ProcessingLogRow>(
        "SELECT * FROM processing_log WHERE recorded_at >= ? ORDER BY id",
    )
    .bind(since.to_rfc3339())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All records that touched one entity key (per-entity debugging)
pub async fn records_for_key(pool: &SqlitePool, entity_key: &str) -> Result<Vec<ProcessingLogRow>> {
    let rows = sqlx::query_as::<_, ProcessingLogRow>(
        r#"
        SELECT p.* FROM processing_log p
        JOIN processing_log_keys k ON k.record_id = p.id
        WHERE k.entity_key = ?
        ORDER BY p.id
        "#,
    )
    .bind(entity_key)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use legis_common::db::init_memory_database;
    use legis_common::Outcome;

    fn record(path: &str, keys: &[&str]) -> ProcessingRecord {
        let mut record = ProcessingRecord::new(path, "sobi", Outcome::Applied);
        record.entity_keys = keys.iter().map(|k| k.to_string()).collect();
        record
    }

    #[tokio::test]
    async fn test_append_and_read_since() {
        let pool = init_memory_database().await.unwrap();
        let mut first = record("/staging/a.TXT", &["bill/2023/S00001"]);
        first.recorded_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let mut second = record("/staging/b.TXT", &["bill/2023/S00002"]);
        second.recorded_at = Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap();
        append(&pool, &first).await.unwrap();
        append(&pool, &second).await.unwrap();

        let since = Utc.with_ymd_and_hms(2023, 1, 15, 0, 0, 0).unwrap();
        let rows = records_since(&pool, since).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_path, "/staging/b.TXT");
    }

    #[tokio::test]
    async fn test_read_for_key() {
        let pool = init_memory_database().await.unwrap();
        append(&pool, &record("/staging/a.TXT", &["bill/2023/S00001"]))
            .await
            .unwrap();
        append(
            &pool,
            &record("/staging/b.TXT", &["bill/2023/S00001", "bill/2023/S00002"]),
        )
        .await
        .unwrap();
        append(&pool, &record("/staging/c.TXT", &["bill/2023/S00003"]))
            .await
            .unwrap();

        let rows = records_for_key(&pool, "bill/2023/S00001").await.unwrap();
        assert_eq!(rows.len(), 2);
        let rows = records_for_key(&pool, "bill/2023/S00003").await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}

//! Persistence coordinator
//!
//! The only component that writes aggregate rows. Commits the updated
//! aggregates and the processing record in one transaction: either both
//! persist or neither does, so a crashed or failed commit leaves the
//! source file eligible for a safe retry (re-applying fragments at or
//! below the watermark is a no-op).

use chrono::Utc;
use legis_common::config::RetryConfig;
use legis_common::{EntityKey, ProcessingRecord, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::merger::{Aggregate, AggregateState};
use crate::prolog;

pub struct PersistenceCoordinator {
    db: SqlitePool,
    retry: RetryConfig,
}

impl PersistenceCoordinator {
    pub fn new(db: SqlitePool, retry: RetryConfig) -> Self {
        Self { db, retry }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Load the aggregate for a key, or create an empty one for a
    /// previously-unseen key. No cross-worker in-memory cache exists; every
    /// application loads fresh state under the key's serialization lock.
    pub async fn load_aggregate(&self, key: &EntityKey) -> Result<Aggregate> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT data, watermarks FROM aggregates WHERE entity_key = ?")
                .bind(key.canonical())
                .fetch_optional(&self.db)
                .await?;

        match row {
            Some((data, watermarks)) => {
                let state: AggregateState = serde_json::from_str(&data).map_err(|e| {
                    legis_common::Error::Internal(format!(
                        "Corrupt aggregate state for {}: {}",
                        key, e
                    ))
                })?;
                let watermarks: BTreeMap<_, _> =
                    serde_json::from_str(&watermarks).map_err(|e| {
                        legis_common::Error::Internal(format!(
                            "Corrupt watermarks for {}: {}",
                            key, e
                        ))
                    })?;
                Ok(Aggregate {
                    key: key.clone(),
                    state,
                    watermarks,
                    dirty: false,
                })
            }
            None => Ok(Aggregate::new(key.clone())),
        }
    }

    /// Commit updated aggregates and the processing record atomically
    pub async fn commit(
        &self,
        aggregates: &[&Aggregate],
        record: &ProcessingRecord,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now().to_rfc3339();

        for aggregate in aggregates.iter().filter(|a| a.dirty) {
            let data = serde_json::to_string(&aggregate.state)
                .map_err(|e| legis_common::Error::Internal(format!("Serialize aggregate: {}", e)))?;
            let watermarks = serde_json::to_string(&aggregate.watermarks)
                .map_err(|e| legis_common::Error::Internal(format!("Serialize watermarks: {}", e)))?;

            sqlx::query(
                r#"
                INSERT INTO aggregates (entity_key, entity_type, data, watermarks, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(entity_key) DO UPDATE SET
                    data = excluded.data,
                    watermarks = excluded.watermarks,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(aggregate.key.canonical())
            .bind(aggregate.key.entity_type())
            .bind(&data)
            .bind(&watermarks)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            // Lineage rows: supersession links are immutable once written,
            // only the active flag may flip
            for version in &aggregate.state.versions {
                sqlx::query(
                    r#"
                    INSERT INTO aggregate_versions (entity_key, version, supersedes, active, created_at)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(entity_key, version) DO UPDATE SET active = excluded.active
                    "#,
                )
                .bind(aggregate.key.canonical())
                .bind(&version.version)
                .bind(&version.supersedes)
                .bind(version.active)
                .bind(version.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
            }
        }

        prolog::append_in_tx(&mut tx, record).await?;
        tx.commit().await?;

        debug!(
            source_path = %record.source_path,
            outcome = %record.outcome,
            aggregates = aggregates.iter().filter(|a| a.dirty).count(),
            "Commit complete"
        );
        Ok(())
    }

    /// Commit with bounded retry and exponential backoff. Exhausting the
    /// ceiling returns the last error; the caller converts that into a
    /// quarantine-with-diagnostic rather than leaving the file in
    /// processing forever.
    pub async fn commit_with_retry(
        &self,
        aggregates: &[&Aggregate],
        record: &ProcessingRecord,
    ) -> Result<()> {
        let mut backoff = Duration::from_millis(self.retry.backoff_ms);
        let mut last_err = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.commit(aggregates, record).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        source_path = %record.source_path,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Commit failed"
                    );
                    last_err = Some(e);
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            legis_common::Error::Internal("Commit retry loop without attempts".to_string())
        }))
    }
}

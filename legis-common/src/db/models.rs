//! Row models for the relational store

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One reconstructed aggregate (`aggregates` table)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AggregateRow {
    pub entity_key: String,
    pub entity_type: String,
    /// Reconstructed state, canonical JSON
    pub data: String,
    /// Per-kind last-applied timestamps, JSON object
    pub watermarks: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One amendment/version lineage entry (`aggregate_versions` table)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VersionRow {
    pub entity_key: String,
    pub version: String,
    pub supersedes: Option<String>,
    pub active: bool,
    pub created_at: String,
}

/// One processing-log entry (`processing_log` table)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProcessingLogRow {
    pub id: i64,
    pub source_path: String,
    pub parser: String,
    /// JSON array of canonical entity keys
    pub entity_keys: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub source_hash: Option<String>,
    pub recorded_at: String,
}

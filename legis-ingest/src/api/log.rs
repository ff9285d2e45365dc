//! Processing-log query handlers
//!
//! GET /ingest/log?since=…, GET /ingest/log/entity/*key. Read-only views
//! over the append-only processing log.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use legis_common::db::ProcessingLogRow;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::prolog;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    /// Only records at or after this instant; omitted means everything
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub records: Vec<ProcessingLogRow>,
}

/// GET /ingest/log
pub async fn records_since(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<LogResponse>> {
    let since = query.since.unwrap_or(DateTime::UNIX_EPOCH);
    let records = prolog::records_since(&state.db, since).await?;
    Ok(Json(LogResponse { records }))
}

/// GET /ingest/log/entity/*key
///
/// Wildcard capture: canonical entity keys contain slashes
/// (e.g. `bill/2023/S01234`).
pub async fn records_for_entity(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<LogResponse>> {
    let records = prolog::records_for_key(&state.db, &key).await?;
    Ok(Json(LogResponse { records }))
}

/// Build processing-log routes
pub fn log_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest/log", get(records_since))
        .route("/ingest/log/entity/*key", get(records_for_entity))
}

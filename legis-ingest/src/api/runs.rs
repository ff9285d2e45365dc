//! Run trigger API handlers
//!
//! POST /ingest/run, POST /ingest/cancel. One run at a time: triggering
//! while a run is in progress returns 409 Conflict.

use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::registry::{DocType, SweepFilter};
use crate::{ActiveRun, AppState};

/// POST /ingest/run request
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRunRequest {
    /// Restrict the sweep to one document type token (e.g. "sobi")
    #[serde(default)]
    pub doc_type: Option<String>,
    /// Only process files extracted at or after this instant
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

/// POST /ingest/run response
#[derive(Debug, Serialize)]
pub struct TriggerRunResponse {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// POST /ingest/cancel response
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub cancelled_at: DateTime<Utc>,
}

/// POST /ingest/run
///
/// Starts a sweep in the background. Returns 202 Accepted with the run id;
/// progress and the final counts arrive over /events.
pub async fn trigger_run(
    State(state): State<AppState>,
    request: Option<Json<TriggerRunRequest>>,
) -> ApiResult<(StatusCode, Json<TriggerRunResponse>)> {
    let Json(request) = request.unwrap_or_else(|| Json(TriggerRunRequest::default()));

    let doc_type = match &request.doc_type {
        Some(token) => Some(DocType::parse_token(token).ok_or_else(|| {
            ApiError::BadRequest(format!("Unknown document type: {}", token))
        })?),
        None => None,
    };
    let filter = SweepFilter {
        doc_type,
        since: request.since,
    };

    let run_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    {
        let mut active = state.active_run.write().await;
        if active.is_some() {
            return Err(ApiError::Conflict("A run is already in progress".to_string()));
        }
        *active = Some(ActiveRun {
            run_id,
            cancel: cancel.clone(),
        });
    }

    let pipeline = state.pipeline.clone();
    let active_run = state.active_run.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.run(run_id, filter, cancel).await {
            tracing::error!(run_id = %run_id, error = %e, "Pipeline run failed");
        }
        *active_run.write().await = None;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerRunResponse {
            run_id,
            started_at: Utc::now(),
        }),
    ))
}

/// POST /ingest/cancel
///
/// Signals the active run to stop after in-flight files finish. Files not
/// yet picked up stay staged for the next sweep.
pub async fn cancel_run(State(state): State<AppState>) -> ApiResult<Json<CancelRunResponse>> {
    let active = state.active_run.read().await;
    match active.as_ref() {
        Some(run) => {
            run.cancel.cancel();
            tracing::info!(run_id = %run.run_id, "Run cancellation requested");
            Ok(Json(CancelRunResponse {
                run_id: run.run_id,
                cancelled_at: Utc::now(),
            }))
        }
        None => Err(ApiError::NotFound("No run in progress".to_string())),
    }
}

/// Build run trigger routes
pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest/run", post(trigger_run))
        .route("/ingest/cancel", post(cancel_run))
}

//! legis-ingest library interface
//!
//! Exposes the pipeline and API surface for integration testing.

pub mod api;
pub mod archive;
pub mod error;
pub mod merger;
pub mod parsers;
pub mod persist;
pub mod pipeline;
pub mod prolog;
pub mod registry;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use legis_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::Pipeline;

/// The run currently sweeping the staging area, if any
#[derive(Clone)]
pub struct ActiveRun {
    pub run_id: Uuid,
    pub cancel: CancellationToken,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (processing-log queries)
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// The pipeline orchestrator
    pub pipeline: Arc<Pipeline>,
    /// At most one run at a time; holds its cancellation token
    pub active_run: Arc<RwLock<Option<ActiveRun>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, pipeline: Arc<Pipeline>) -> Self {
        Self {
            db,
            event_bus,
            pipeline,
            active_run: Arc::new(RwLock::new(None)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::run_routes())
        .merge(api::log_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}

//! SSE event stream endpoint

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams pipeline events (run started/completed, per-file outcomes) to
/// connected operator tooling.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    legis_common::sse::create_event_sse_stream(&state.event_bus, "legis-ingest")
}

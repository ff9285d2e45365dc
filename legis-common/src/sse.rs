//! Server-Sent Events (SSE) utilities
//!
//! Streams pipeline events to connected operator tooling with periodic
//! heartbeats for connection status monitoring.

use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::events::EventBus;

/// Create an SSE stream of pipeline events with heartbeats
pub fn create_event_sse_stream(
    bus: &EventBus,
    service_name: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);
    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        // Initial connected status
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match tokio::time::timeout(Duration::from_secs(15), rx.recv()).await {
                Ok(Ok(event)) => {
                    match serde_json::to_string(&event) {
                        Ok(json) => yield Ok(Event::default().event("PipelineEvent").data(json)),
                        Err(e) => debug!("SSE: failed to serialize event: {}", e),
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!("SSE: receiver lagged, {} events skipped", skipped);
                }
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => {
                    // No event within the heartbeat window
                    yield Ok(Event::default().comment("heartbeat"));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

//! HTTP API handlers for legis-ingest
//!
//! Run triggering, processing-log queries, health, and the SSE event
//! stream consumed by operator tooling.

pub mod health;
pub mod log;
pub mod runs;
pub mod sse;

pub use health::health_routes;
pub use log::log_routes;
pub use runs::run_routes;
pub use sse::event_stream;

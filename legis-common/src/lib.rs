//! Shared library for the legislative ingest pipeline
//!
//! Holds the domain model (entity keys, fragments, outcomes, processing
//! records), the shared error type, configuration, database bootstrap and
//! the pipeline event bus.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fragment;
pub mod keys;
pub mod sse;

pub use error::{Error, Result};
pub use fragment::{Fragment, FragmentKind, IgnoreReason, Outcome, ProcessingRecord, QuarantineReason};
pub use keys::{Chamber, EntityKey};

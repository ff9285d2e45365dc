//! Fragments, outcomes and processing records
//!
//! A fragment is the unit of merge: a typed, timestamped delta describing one
//! aspect of an entity, extracted from exactly one source file. Fragments are
//! never mutated after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::keys::EntityKey;
use crate::{Error, Result};

/// Kind of delta a fragment carries.
///
/// Each entity type supports a subset of kinds; the merger quarantines
/// fragments whose kind the target aggregate does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    /// Title, summary, status and other scalar bill/entity fields
    Metadata,
    /// One dated legislative action (additive, ordered within the aggregate)
    Action,
    /// Sponsor / co-sponsor list
    Sponsor,
    /// Full text under a version label (drives amendment lineage)
    Text,
    /// Floor or committee vote record
    Vote,
    /// Committee membership roster
    Membership,
    /// Calendar / agenda scheduling entries
    Schedule,
}

impl FragmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Metadata => "metadata",
            FragmentKind::Action => "action",
            FragmentKind::Sponsor => "sponsor",
            FragmentKind::Text => "text",
            FragmentKind::Vote => "vote",
            FragmentKind::Membership => "membership",
            FragmentKind::Schedule => "schedule",
        }
    }

    pub fn all() -> &'static [FragmentKind] {
        &[
            FragmentKind::Metadata,
            FragmentKind::Action,
            FragmentKind::Sponsor,
            FragmentKind::Text,
            FragmentKind::Vote,
            FragmentKind::Membership,
            FragmentKind::Schedule,
        ]
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FragmentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FragmentKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown fragment kind: {}", s)))
    }
}

/// Typed, timestamped delta extracted from one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Aggregate this fragment belongs to
    pub entity_key: EntityKey,
    /// What aspect of the aggregate it updates
    pub kind: FragmentKind,
    /// Publication timestamp used for watermark ordering
    pub published_at: DateTime<Utc>,
    /// Explicit within-day order for actions sharing a timestamp
    pub sequence_hint: Option<u32>,
    /// Canonical JSON payload (parser-normalized)
    pub payload: serde_json::Value,
}

impl Fragment {
    pub fn new(
        entity_key: EntityKey,
        kind: FragmentKind,
        published_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            entity_key,
            kind,
            published_at,
            sequence_hint: None,
            payload,
        }
    }

    pub fn with_sequence_hint(mut self, hint: u32) -> Self {
        self.sequence_hint = Some(hint);
        self
    }
}

/// Reason a fragment or file was ignored (still archived, no aggregate change)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IgnoreReason {
    /// Same timestamp, identical payload — redelivery
    Duplicate,
    /// Older than the aggregate's watermark for this kind
    Stale,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::Duplicate => "duplicate",
            IgnoreReason::Stale => "stale",
        }
    }
}

/// Reason a fragment or file was quarantined (terminal, operator attention)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuarantineReason {
    /// Filename matched no classifier pattern
    UnrecognizedType,
    /// Structurally invalid document for its declared type
    ParseError,
    /// Same timestamp as the last-applied fragment of this kind but a
    /// different payload — ambiguous ordering, never silently overwritten
    ConflictingSameTimestamp,
    /// Fragment kind the target aggregate does not support
    UnsupportedFragment,
    /// Commit retries exhausted against the relational store
    PersistenceFailure,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::UnrecognizedType => "unrecognized-type",
            QuarantineReason::ParseError => "parse-error",
            QuarantineReason::ConflictingSameTimestamp => "conflicting-same-timestamp",
            QuarantineReason::UnsupportedFragment => "unsupported-fragment",
            QuarantineReason::PersistenceFailure => "persistence-failure",
        }
    }
}

/// Fate of one fragment (or, lifted to the file level, one source file)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Applied,
    Ignored(IgnoreReason),
    Quarantined(QuarantineReason),
}

impl Outcome {
    /// Label recorded in the processing log, e.g. `ignored: stale`
    pub fn label(&self) -> String {
        match self {
            Outcome::Applied => "applied".to_string(),
            Outcome::Ignored(r) => format!("ignored: {}", r.as_str()),
            Outcome::Quarantined(r) => format!("quarantined: {}", r.as_str()),
        }
    }

    pub fn is_quarantine(&self) -> bool {
        matches!(self, Outcome::Quarantined(_))
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Append-only audit record, one per source-file processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// Staged path of the source file
    pub source_path: String,
    /// Parser (or pipeline stage) that produced the outcome
    pub parser: String,
    /// Canonical entity keys touched by this attempt
    pub entity_keys: Vec<String>,
    /// Outcome label (`applied`, `ignored: …`, `quarantined: …`)
    pub outcome: String,
    /// Diagnostic detail for quarantines
    pub reason: Option<String>,
    /// SHA-256 of the file content, for redelivery audit
    pub source_hash: Option<String>,
    /// When the attempt was recorded
    pub recorded_at: DateTime<Utc>,
}

impl ProcessingRecord {
    pub fn new(source_path: impl Into<String>, parser: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            source_path: source_path.into(),
            parser: parser.into(),
            entity_keys: Vec::new(),
            outcome: outcome.label(),
            reason: None,
            source_hash: None,
            recorded_at: Utc::now(),
        }
    }
}

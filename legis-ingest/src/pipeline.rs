//! Pipeline orchestrator
//!
//! Runs one sweep over the staging area: classify, parse, merge, commit,
//! archive. Files are processed by a worker pool; fragment application is
//! serialized per entity key through `KeyLocks`, so the pool's scheduling
//! order never affects final aggregate state.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use legis_common::events::{EventBus, PipelineEvent};
use legis_common::{IgnoreReason, Outcome, ProcessingRecord, QuarantineReason, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::archive::ArchiveManager;
use crate::merger::{merge_fragment, Aggregate, KeyLocks};
use crate::parsers;
use crate::persist::PersistenceCoordinator;
use crate::prolog;
use crate::registry::{SourceFile, SourceRegistry, SweepFilter};

/// One quarantined file in the run report
#[derive(Debug, Clone, Serialize)]
pub struct QuarantinedFile {
    pub path: String,
    pub reason: String,
}

/// Exit/status contract for one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub applied: usize,
    pub ignored: usize,
    pub quarantined: usize,
    pub quarantined_files: Vec<QuarantinedFile>,
    pub cancelled: bool,
}

/// Terminal result of one file
struct FileResult {
    path: String,
    outcome: Outcome,
    reason: Option<String>,
}

pub struct Pipeline {
    registry: SourceRegistry,
    persistence: PersistenceCoordinator,
    archive: ArchiveManager,
    locks: KeyLocks,
    events: EventBus,
    worker_count: usize,
}

impl Pipeline {
    pub fn new(
        registry: SourceRegistry,
        persistence: PersistenceCoordinator,
        archive: ArchiveManager,
        events: EventBus,
        worker_count: usize,
    ) -> Self {
        Self {
            registry,
            persistence,
            archive,
            locks: KeyLocks::new(),
            events,
            worker_count: worker_count.max(1),
        }
    }

    pub fn persistence(&self) -> &PersistenceCoordinator {
        &self.persistence
    }

    /// Sweep the staging area: full when the filter is empty, bounded
    /// incremental otherwise. Already-archived files are gone from staging,
    /// so a sweep never reprocesses them.
    pub async fn run(
        &self,
        run_id: Uuid,
        filter: SweepFilter,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let enumeration = self
            .registry
            .enumerate(&filter)
            .map_err(|e| legis_common::Error::Internal(e.to_string()))?;

        info!(
            run_id = %run_id,
            staged = enumeration.files.len(),
            unrecognized = enumeration.unrecognized.len(),
            "Pipeline run starting"
        );
        self.events.publish(PipelineEvent::RunStarted {
            run_id,
            staged_files: enumeration.files.len(),
            timestamp: Utc::now(),
        });

        let mut summary = RunSummary {
            run_id,
            applied: 0,
            ignored: 0,
            quarantined: 0,
            quarantined_files: Vec::new(),
            cancelled: false,
        };

        // Unclassifiable files are reported, never silently dropped
        for unrecognized in &enumeration.unrecognized {
            let mut record = ProcessingRecord::new(
                unrecognized.path.display().to_string(),
                "classifier",
                Outcome::Quarantined(QuarantineReason::UnrecognizedType),
            );
            record.reason = Some(format!("No pattern matched {:?}", unrecognized.file_name));
            if let Err(e) = prolog::append(self.persistence.pool(), &record).await {
                warn!("Failed to log unrecognized file: {}", e);
                continue;
            }
            if let Err(e) = self
                .archive
                .quarantine_unrecognized(&unrecognized.path, &unrecognized.file_name)
            {
                warn!(file = %unrecognized.file_name, "Quarantine move failed: {}", e);
            }
            summary.quarantined += 1;
            summary.quarantined_files.push(QuarantinedFile {
                path: unrecognized.path.display().to_string(),
                reason: "unrecognized-type".to_string(),
            });
        }

        let results: Vec<Option<FileResult>> = stream::iter(enumeration.files.iter().cloned())
            .map(|file| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let result = self.process_file(&file).await;
                    if let Some(result) = &result {
                        self.events.publish(PipelineEvent::FileProcessed {
                            run_id,
                            path: result.path.clone(),
                            outcome: result.outcome.label(),
                            timestamp: Utc::now(),
                        });
                    }
                    result
                }
            })
            .buffer_unordered(self.worker_count)
            .collect()
            .await;

        for result in results.into_iter().flatten() {
            match result.outcome {
                Outcome::Applied => summary.applied += 1,
                Outcome::Ignored(_) => summary.ignored += 1,
                Outcome::Quarantined(_) => {
                    summary.quarantined += 1;
                    summary.quarantined_files.push(QuarantinedFile {
                        path: result.path,
                        reason: result.reason.unwrap_or_else(|| result.outcome.label()),
                    });
                }
            }
        }

        summary.cancelled = cancel.is_cancelled();
        if summary.cancelled {
            self.events.publish(PipelineEvent::RunCancelled {
                run_id,
                timestamp: Utc::now(),
            });
        } else {
            self.events.publish(PipelineEvent::RunCompleted {
                run_id,
                applied: summary.applied,
                ignored: summary.ignored,
                quarantined: summary.quarantined,
                timestamp: Utc::now(),
            });
        }
        info!(
            run_id = %run_id,
            applied = summary.applied,
            ignored = summary.ignored,
            quarantined = summary.quarantined,
            cancelled = summary.cancelled,
            "Pipeline run finished"
        );
        Ok(summary)
    }

    /// Process one staged file to a terminal status. Returns None when the
    /// file could not be read (left staged for the next sweep).
    async fn process_file(&self, file: &SourceFile) -> Option<FileResult> {
        let content = match tokio::fs::read(&file.path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %file.file_name, "Read failed, leaving staged: {}", e);
                return None;
            }
        };
        let source_hash = format!("{:x}", Sha256::digest(&content));

        let parser = parsers::parser_for(file.doc_type);
        let output = parser.parse(file, &content);

        if output.is_failure() {
            let reason = output
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Some(
                self.quarantine_before_commit(
                    file,
                    parser.name(),
                    QuarantineReason::ParseError,
                    reason,
                    source_hash,
                )
                .await,
            );
        }

        // Serialize against every key this file touches, in canonical order
        let mut keys: Vec<String> = output
            .fragments
            .iter()
            .map(|f| f.entity_key.canonical())
            .collect();
        keys.sort();
        keys.dedup();
        let _guards = self.locks.lock_keys(&keys).await;

        let mut aggregates: HashMap<String, Aggregate> = HashMap::new();
        let mut file_outcome = None;
        let mut quarantine_reason = None;
        let mut any_applied = false;
        let mut any_stale = false;

        for fragment in &output.fragments {
            let canonical = fragment.entity_key.canonical();
            let aggregate = match aggregates.entry(canonical) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    match self.persistence.load_aggregate(&fragment.entity_key).await {
                        Ok(aggregate) => entry.insert(aggregate),
                        Err(e) => {
                            warn!(file = %file.file_name, "Aggregate load failed, leaving staged: {}", e);
                            return None;
                        }
                    }
                }
            };

            match merge_fragment(aggregate, fragment) {
                Outcome::Applied => any_applied = true,
                Outcome::Ignored(IgnoreReason::Stale) => any_stale = true,
                Outcome::Ignored(IgnoreReason::Duplicate) => {}
                Outcome::Quarantined(q) => {
                    // Terminal for the file; fragments already accepted
                    // from it stay applied
                    file_outcome = Some(Outcome::Quarantined(q));
                    quarantine_reason = Some(format!(
                        "{} fragment for {} at {}: {}",
                        fragment.kind,
                        fragment.entity_key,
                        fragment.published_at.to_rfc3339(),
                        q.as_str()
                    ));
                    break;
                }
            }
        }

        let outcome = file_outcome.unwrap_or(if any_applied {
            Outcome::Applied
        } else if any_stale {
            Outcome::Ignored(IgnoreReason::Stale)
        } else {
            Outcome::Ignored(IgnoreReason::Duplicate)
        });

        let mut record = ProcessingRecord::new(file.path.display().to_string(), parser.name(), outcome);
        record.entity_keys = keys;
        record.reason = quarantine_reason.clone();
        record.source_hash = Some(source_hash.clone());

        let dirty: Vec<&Aggregate> = aggregates.values().filter(|a| a.dirty).collect();
        if let Err(e) = self.persistence.commit_with_retry(&dirty, &record).await {
            warn!(file = %file.file_name, "Commit retries exhausted: {}", e);
            return Some(
                self.quarantine_before_commit(
                    file,
                    parser.name(),
                    QuarantineReason::PersistenceFailure,
                    e.to_string(),
                    source_hash,
                )
                .await,
            );
        }

        // Archive failure after a successful commit does not roll anything
        // back; a reconciliation sweep can pick up stragglers
        if let Err(e) = self
            .archive
            .finalize(file, outcome, quarantine_reason.as_deref(), parser.name())
        {
            warn!(file = %file.file_name, "Archive move failed after commit: {}", e);
        }

        Some(FileResult {
            path: file.path.display().to_string(),
            outcome,
            reason: quarantine_reason,
        })
    }

    /// Quarantine a file whose processing never produced an aggregate
    /// commit (parse failure, exhausted persistence retries)
    async fn quarantine_before_commit(
        &self,
        file: &SourceFile,
        parser: &str,
        reason_kind: QuarantineReason,
        reason: String,
        source_hash: String,
    ) -> FileResult {
        let outcome = Outcome::Quarantined(reason_kind);
        let mut record = ProcessingRecord::new(file.path.display().to_string(), parser, outcome);
        record.reason = Some(reason.clone());
        record.source_hash = Some(source_hash);
        if let Err(e) = prolog::append(self.persistence.pool(), &record).await {
            warn!(file = %file.file_name, "Failed to log quarantine: {}", e);
        }
        if let Err(e) = self.archive.finalize(file, outcome, Some(&reason), parser) {
            warn!(file = %file.file_name, "Quarantine move failed: {}", e);
        }
        FileResult {
            path: file.path.display().to_string(),
            outcome,
            reason: Some(reason),
        }
    }
}

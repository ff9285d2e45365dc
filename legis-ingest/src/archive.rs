//! Archive manager
//!
//! Moves fully-processed source files out of staging: applied/ignored
//! files to an archive tree partitioned by type and date (replayable),
//! quarantined files to a quarantine tree with a JSON sidecar diagnostic.
//! Quarantined files are never auto-retried.

use chrono::Utc;
use legis_common::{Outcome, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::registry::{SourceFile, SourceStatus};

/// Sidecar diagnostic written next to each quarantined file
#[derive(Debug, Serialize)]
struct QuarantineDiagnostic<'a> {
    reason: &'a str,
    parser: &'a str,
    source_path: String,
    timestamp: String,
}

pub struct ArchiveManager {
    archive_root: PathBuf,
    quarantine_root: PathBuf,
}

impl ArchiveManager {
    pub fn new(archive_root: impl Into<PathBuf>, quarantine_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
            quarantine_root: quarantine_root.into(),
        }
    }

    /// Move a processed file to its terminal location and return its final
    /// status. Callers treat archive-move errors after a successful commit
    /// as warnings, not failures.
    pub fn finalize(
        &self,
        file: &SourceFile,
        outcome: Outcome,
        reason: Option<&str>,
        parser: &str,
    ) -> Result<SourceStatus> {
        match outcome {
            Outcome::Applied | Outcome::Ignored(_) => {
                let dest_dir = self
                    .archive_root
                    .join(file.doc_type.as_str())
                    .join(file.extracted_at.format("%Y/%m/%d").to_string());
                self.move_into(&file.path, &dest_dir, &file.file_name)?;
                info!(
                    file = %file.file_name,
                    outcome = %outcome,
                    "Archived source file"
                );
                Ok(SourceStatus::Archived)
            }
            Outcome::Quarantined(q) => {
                let dest_dir = self.quarantine_root.join(file.doc_type.as_str());
                self.move_into(&file.path, &dest_dir, &file.file_name)?;

                let diagnostic = QuarantineDiagnostic {
                    reason: reason.unwrap_or(q.as_str()),
                    parser,
                    source_path: file.path.display().to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                };
                let sidecar = dest_dir.join(format!("{}.diagnostic.json", file.file_name));
                match serde_json::to_string_pretty(&diagnostic) {
                    Ok(json) => std::fs::write(&sidecar, json)?,
                    Err(e) => warn!(file = %file.file_name, "Sidecar serialization failed: {}", e),
                }
                warn!(
                    file = %file.file_name,
                    reason = diagnostic.reason,
                    "Quarantined source file"
                );
                Ok(SourceStatus::Quarantined)
            }
        }
    }

    /// Quarantine a path that never classified (no SourceFile exists)
    pub fn quarantine_unrecognized(&self, path: &Path, file_name: &str) -> Result<()> {
        let dest_dir = self.quarantine_root.join("unrecognized");
        self.move_into(path, &dest_dir, file_name)?;
        let diagnostic = QuarantineDiagnostic {
            reason: "unrecognized-type",
            parser: "classifier",
            source_path: path.display().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        let sidecar = dest_dir.join(format!("{}.diagnostic.json", file_name));
        if let Ok(json) = serde_json::to_string_pretty(&diagnostic) {
            std::fs::write(&sidecar, json)?;
        }
        Ok(())
    }

    fn move_into(&self, src: &Path, dest_dir: &Path, file_name: &str) -> Result<()> {
        std::fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(file_name);
        if let Err(rename_err) = std::fs::rename(src, &dest) {
            // Cross-device staging roots can't rename; fall back to copy+remove
            std::fs::copy(src, &dest).map_err(|_| rename_err)?;
            std::fs::remove_file(src)?;
        }
        Ok(())
    }
}

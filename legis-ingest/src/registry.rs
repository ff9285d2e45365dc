//! Source registry
//!
//! Enumerates the staging area, classifies each file by filename structure
//! and assigns its extraction timestamp. Classification is an ordered list
//! of pattern matchers evaluated first-match; unrecognized files are
//! reported, never silently dropped.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Source registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Staging root does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Staging root exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Document family detected from the filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Legacy fixed-format transfer file (Windows-1252, positional fields)
    Sobi,
    /// State bill status XML
    BillStatus,
    /// State bill text XML
    BillText,
    /// Floor calendar XML
    Calendar,
    /// Committee agenda XML
    Agenda,
    /// Committee roster XML
    Committee,
    /// Member roster XML
    Member,
    /// Federal bulk bill status XML
    FedBillStatus,
}

impl DocType {
    /// Token used in archive/quarantine partitioning and API filters
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Sobi => "sobi",
            DocType::BillStatus => "billstatus",
            DocType::BillText => "billtext",
            DocType::Calendar => "calendar",
            DocType::Agenda => "agenda",
            DocType::Committee => "committee",
            DocType::Member => "member",
            DocType::FedBillStatus => "fedbillstatus",
        }
    }

    pub fn parse_token(token: &str) -> Option<DocType> {
        match token {
            "sobi" => Some(DocType::Sobi),
            "billstatus" => Some(DocType::BillStatus),
            "billtext" => Some(DocType::BillText),
            "calendar" => Some(DocType::Calendar),
            "agenda" => Some(DocType::Agenda),
            "committee" => Some(DocType::Committee),
            "member" => Some(DocType::Member),
            "fedbillstatus" => Some(DocType::FedBillStatus),
            _ => None,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only lifecycle of a staged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Staged,
    Processing,
    Archived,
    Quarantined,
}

/// One staged source document, immutable once classified
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub doc_type: DocType,
    /// Extraction timestamp encoded in the filename (filesystem mtime for
    /// publisher bulk names that carry none)
    pub extracted_at: DateTime<Utc>,
    pub status: SourceStatus,
}

/// A staged file no classifier recognized; quarantined by the pipeline
#[derive(Debug, Clone)]
pub struct UnrecognizedFile {
    pub path: PathBuf,
    pub file_name: String,
}

/// Bounds for an incremental sweep
#[derive(Debug, Clone, Default)]
pub struct SweepFilter {
    pub doc_type: Option<DocType>,
    pub since: Option<DateTime<Utc>>,
}

/// Result of enumerating the staging area
#[derive(Debug)]
pub struct Enumeration {
    /// Classified files, ordered by extraction timestamp within each type
    pub files: Vec<SourceFile>,
    /// Files matching no pattern
    pub unrecognized: Vec<UnrecognizedFile>,
}

type Matcher = fn(&str) -> Option<DocType>;

/// Ordered classifier table, first match wins. New document families are
/// added here without touching the merger or persistence layers.
static MATCHERS: Lazy<Vec<(&'static str, Matcher)>> = Lazy::new(|| {
    vec![
        ("sobi", match_sobi as Matcher),
        ("state-xml", match_state_xml as Matcher),
        ("fed-bulk", match_fed_bulk as Matcher),
    ]
});

/// `SOBI.DyyMMdd.THHmmss.TXT`
fn match_sobi(name: &str) -> Option<DocType> {
    sobi_timestamp(name).map(|_| DocType::Sobi)
}

fn sobi_timestamp(name: &str) -> Option<NaiveDateTime> {
    let rest = name.strip_prefix("SOBI.D")?;
    let (date_part, rest) = rest.split_at_checked(6)?;
    let rest = rest.strip_prefix(".T")?;
    let (time_part, rest) = rest.split_at_checked(6)?;
    if !rest.eq_ignore_ascii_case(".TXT") {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(time_part, "%H%M%S").ok()?;
    Some(date.and_time(time))
}

/// `YYYY-MM-DD-HH.MM.SS.ffffff_<TYPE>_<KEY>.XML`
fn match_state_xml(name: &str) -> Option<DocType> {
    let (_, type_token, _) = split_state_xml(name)?;
    state_xml_type(&type_token)
}

fn split_state_xml(name: &str) -> Option<(NaiveDateTime, String, String)> {
    let stem = name.strip_suffix(".XML").or_else(|| name.strip_suffix(".xml"))?;
    let mut parts = stem.splitn(3, '_');
    let ts_part = parts.next()?;
    let type_token = parts.next()?;
    let key_part = parts.next()?;
    let ts = NaiveDateTime::parse_from_str(ts_part, "%Y-%m-%d-%H.%M.%S%.6f").ok()?;
    Some((ts, type_token.to_string(), key_part.to_string()))
}

fn state_xml_type(token: &str) -> Option<DocType> {
    match token {
        "BILLSTATUS" => Some(DocType::BillStatus),
        "BILLTEXT" => Some(DocType::BillText),
        "CALENDAR" => Some(DocType::Calendar),
        "AGENDA" => Some(DocType::Agenda),
        "COMMITTEE" => Some(DocType::Committee),
        "MEMBER" => Some(DocType::Member),
        _ => None,
    }
}

/// `BILLSTATUS-<congress><type><number>.xml` (federal bulk collections)
fn match_fed_bulk(name: &str) -> Option<DocType> {
    let stem = name.strip_suffix(".xml").or_else(|| name.strip_suffix(".XML"))?;
    let rest = stem.strip_prefix("BILLSTATUS-")?;
    // Sanity check the congress prefix so arbitrary BILLSTATUS-* names
    // don't classify; the parser does the full identifier decode.
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() > 3 {
        return None;
    }
    Some(DocType::FedBillStatus)
}

/// Classify one filename. First matching pattern wins.
pub fn classify(file_name: &str) -> Option<DocType> {
    MATCHERS
        .iter()
        .find_map(|(_, matcher)| matcher(file_name))
}

/// Extraction timestamp from the filename, when the convention carries one
pub fn filename_timestamp(file_name: &str, doc_type: DocType) -> Option<DateTime<Utc>> {
    let naive = match doc_type {
        DocType::Sobi => sobi_timestamp(file_name)?,
        DocType::FedBillStatus => return None,
        _ => split_state_xml(file_name)?.0,
    };
    Some(Utc.from_utc_datetime(&naive))
}

/// Source registry over one staging root
pub struct SourceRegistry {
    staging_root: PathBuf,
}

impl SourceRegistry {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    /// Enumerate and classify staged files.
    ///
    /// Restartable: re-scanning yields the same set modulo new arrivals,
    /// since processed files are moved out of staging by the archive
    /// manager. Files are ordered by extraction timestamp within a type;
    /// no cross-type ordering is guaranteed (entity-level ordering is the
    /// merger's job).
    pub fn enumerate(&self, filter: &SweepFilter) -> Result<Enumeration, RegistryError> {
        if !self.staging_root.exists() {
            return Err(RegistryError::PathNotFound(self.staging_root.clone()));
        }
        if !self.staging_root.is_dir() {
            return Err(RegistryError::NotADirectory(self.staging_root.clone()));
        }

        let mut files = Vec::new();
        let mut unrecognized = Vec::new();

        for entry in WalkDir::new(&self.staging_root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error accessing staging entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();

            let Some(doc_type) = classify(&file_name) else {
                unrecognized.push(UnrecognizedFile {
                    path: entry.path().to_path_buf(),
                    file_name,
                });
                continue;
            };

            // A file whose mtime cannot be read stays staged for the next
            // sweep; one bad entry never aborts the enumeration
            let extracted_at = match filename_timestamp(&file_name, doc_type)
                .or_else(|| file_mtime(entry.path()))
            {
                Some(ts) => ts,
                None => continue,
            };

            if let Some(wanted) = filter.doc_type {
                if doc_type != wanted {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if extracted_at < since {
                    continue;
                }
            }

            files.push(SourceFile {
                path: entry.path().to_path_buf(),
                file_name,
                doc_type,
                extracted_at,
                status: SourceStatus::Staged,
            });
        }

        // Extraction-timestamp order within each detected type
        files.sort_by(|a, b| {
            (a.doc_type, a.extracted_at, &a.file_name).cmp(&(b.doc_type, b.extracted_at, &b.file_name))
        });

        tracing::debug!(
            staged = files.len(),
            unrecognized = unrecognized.len(),
            "Staging enumeration complete"
        );

        Ok(Enumeration { files, unrecognized })
    }
}

/// Filesystem mtime for filename families that carry no timestamp
fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => Some(DateTime::<Utc>::from(mtime)),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Cannot read mtime, skipping file: {}", e);
            None
        }
    }
}

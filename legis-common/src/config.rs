//! Configuration loading and data root resolution
//!
//! Resolution priority per setting: command line → environment variable →
//! TOML config file → OS-dependent compiled default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "LEGIS_";

/// Commit retry policy for the persistence coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum commit attempts before a file is quarantined
    pub max_attempts: u32,
    /// Base backoff between attempts, doubled each retry
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 250,
        }
    }
}

/// Pipeline configuration (TOML file shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Inbound feed directory scanned by the source registry
    pub staging_root: PathBuf,
    /// Processed files, partitioned by type and date
    pub archive_root: PathBuf,
    /// Terminal holding area for files needing operator attention
    pub quarantine_root: PathBuf,
    /// Sqlite database file
    pub database_path: PathBuf,
    /// Parallel source-file workers (per-key ordering is enforced separately)
    pub worker_count: usize,
    /// HTTP listen port for the trigger/status API
    pub listen_port: u16,
    /// Persistence commit retry policy
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let root = default_data_root();
        Self {
            staging_root: root.join("staging"),
            archive_root: root.join("archive"),
            quarantine_root: root.join("quarantine"),
            database_path: root.join("legis.db"),
            worker_count: 4,
            listen_port: 5750,
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration: explicit path, else the platform config file,
    /// else compiled defaults; then apply environment overrides.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_file() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read config {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse config {} failed: {}", path.display(), e)))
    }

    /// Environment overrides: LEGIS_STAGING_ROOT, LEGIS_ARCHIVE_ROOT,
    /// LEGIS_QUARANTINE_ROOT, LEGIS_DATABASE_PATH, LEGIS_WORKER_COUNT,
    /// LEGIS_LISTEN_PORT.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(format!("{}STAGING_ROOT", ENV_PREFIX)) {
            self.staging_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{}ARCHIVE_ROOT", ENV_PREFIX)) {
            self.archive_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{}QUARANTINE_ROOT", ENV_PREFIX)) {
            self.quarantine_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{}DATABASE_PATH", ENV_PREFIX)) {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{}WORKER_COUNT", ENV_PREFIX)) {
            if let Ok(n) = v.parse() {
                self.worker_count = n;
            }
        }
        if let Ok(v) = std::env::var(format!("{}LISTEN_PORT", ENV_PREFIX)) {
            if let Ok(n) = v.parse() {
                self.listen_port = n;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the staging/archive/quarantine directories and the database
    /// parent directory if missing.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.staging_root)?;
        std::fs::create_dir_all(&self.archive_root)?;
        std::fs::create_dir_all(&self.quarantine_root)?;
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Platform config file: ~/.config/legis/ingest.toml (or OS equivalent)
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("legis").join("ingest.toml"))
}

/// Platform data root: ~/.local/share/legis (or OS equivalent)
fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("legis"))
        .unwrap_or_else(|| PathBuf::from("./legis_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_toml_round_trip() {
        let config = PipelineConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.staging_root, config.staging_root);
        assert_eq!(parsed.listen_port, config.listen_port);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("LEGIS_WORKER_COUNT", "9");
        let mut config = PipelineConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("LEGIS_WORKER_COUNT");
        assert_eq!(config.worker_count, 9);
    }

    #[test]
    #[serial]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(&path, "listen_port = 6001\nworker_count = 2\n").unwrap();
        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.listen_port, 6001);
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    #[serial]
    fn test_partial_toml_uses_defaults() {
        let parsed: PipelineConfig = toml::from_str("worker_count = 2\n").unwrap();
        assert_eq!(parsed.worker_count, 2);
        assert_eq!(parsed.retry.max_attempts, RetryConfig::default().max_attempts);
    }
}

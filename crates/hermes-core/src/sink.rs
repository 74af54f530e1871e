//! Filesystem persistence for a batch run.
//!
//! Layout under the output directory:
//!
//! ```text
//! <output_dir>/
//!   records/product_<sha256[..16]>.json   one pretty-printed record per address
//!   failures.jsonl                        one line per terminal failure
//!   batch_summary.json                    written once the run finishes
//! ```
//!
//! Every JSON file is written to a sibling temp file and renamed into place,
//! so readers never observe a half-written record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, FetchError, FetchErrorKind};
use crate::models::{Record, record_file_name};
use crate::traits::RecordSink;

pub const RECORDS_DIR: &str = "records";
pub const FAILURES_FILE: &str = "failures.jsonl";
pub const SUMMARY_FILE: &str = "batch_summary.json";

/// One line of the failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub address: String,
    pub kind: FetchErrorKind,
    pub attempts: u32,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureEntry {
    pub fn from_error(error: &FetchError, attempts: u32) -> Self {
        Self {
            address: error.address.clone(),
            kind: error.kind,
            attempts,
            message: error.message.clone(),
            failed_at: Utc::now(),
        }
    }
}

/// [`RecordSink`] writing JSON files into an output directory.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    root: PathBuf,
}

impl JsonDirSink {
    /// Create the directory layout and start a fresh failure log.
    pub async fn create(output_dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = output_dir.into();
        tokio::fs::create_dir_all(root.join(RECORDS_DIR))
            .await
            .map_err(|e| {
                AppError::SinkError(format!("cannot create {}: {e}", root.display()))
            })?;
        tokio::fs::write(root.join(FAILURES_FILE), b"").await?;
        Ok(Self { root })
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_DIR)
    }

    pub fn failures_path(&self) -> PathBuf {
        self.root.join(FAILURES_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    pub fn record_path(&self, address: &str) -> PathBuf {
        self.records_dir().join(record_file_name(address))
    }

    /// Failures logged so far in this run.
    pub async fn failures(&self) -> Result<Vec<FailureEntry>, AppError> {
        load_failures(&self.failures_path()).await
    }
}

impl RecordSink for JsonDirSink {
    async fn save_record(&self, address: &str, record: &Record) -> Result<(), AppError> {
        let path = self.record_path(address);
        write_json_atomic(&path, record)
            .await
            .map_err(|e| AppError::SinkError(format!("{}: {e}", path.display())))?;
        tracing::debug!(%address, path = %path.display(), "Record written");
        Ok(())
    }

    async fn record_failure(&self, error: &FetchError, attempts: u32) -> Result<(), AppError> {
        let mut line = serde_json::to_string(&FailureEntry::from_error(error, attempts))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.failures_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn has_record(&self, address: &str) -> Result<bool, AppError> {
        Ok(tokio::fs::try_exists(self.record_path(address)).await?)
    }
}

/// Serialize `value` as pretty JSON into `path` via temp file + rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read a failure log. A missing file is an empty log; unparsable lines
/// are skipped with a warning.
pub async fn load_failures(path: &Path) -> Result<Vec<FailureEntry>, AppError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FailureEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "Skipping unreadable failure entry");
            }
        }
    }
    Ok(entries)
}

/// Addresses from a previous run's failure log, deduplicated in log order.
pub async fn load_failed_addresses(output_dir: &Path) -> Result<Vec<String>, AppError> {
    let path = output_dir.join(FAILURES_FILE);
    if !tokio::fs::try_exists(&path).await? {
        return Err(AppError::InputError(format!(
            "no failure log at {}",
            path.display()
        )));
    }

    let mut seen = HashSet::new();
    Ok(load_failures(&path)
        .await?
        .into_iter()
        .map(|e| e.address)
        .filter(|a| seen.insert(a.clone()))
        .collect())
}

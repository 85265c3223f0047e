//! Input loading and input file inspection.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{RecflowError, Result};
use crate::model::{InputSource, InputSourceKind, StageConfig};
use crate::record::Record;

/// Files above this size trigger a [`FileSizeWarning`] (100 MB).
pub const FILE_SIZE_WARN_BYTES: u64 = 100 * 1024 * 1024;
/// Files above this size are flagged as dangerous (1 GB).
pub const FILE_SIZE_DANGER_BYTES: u64 = 1024 * 1024 * 1024;

/// Assumed average size of one JSON line when estimating record counts.
const ESTIMATED_BYTES_PER_RECORD: u64 = 200;

/// Reads records or raw text from an input source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordLoader: Send + Sync {
    /// Loads the input as records.
    async fn load_records(&self, input: &InputSource) -> Result<Vec<Record>>;

    /// Loads the input as raw text.
    async fn load_content(&self, input: &InputSource) -> Result<String>;
}

/// Loader backed by the local filesystem.
///
/// File inputs are read as JSONL; captured inputs are served from memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRecordLoader;

impl FsRecordLoader {
    /// Creates a loader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecordLoader for FsRecordLoader {
    async fn load_records(&self, input: &InputSource) -> Result<Vec<Record>> {
        match &input.source {
            InputSourceKind::File { path } => {
                let text = tokio::fs::read_to_string(path).await?;
                let records = parse_jsonl(&text)?;
                debug!(path = %path.display(), records = records.len(), "Loaded input records");
                Ok(records)
            }
            InputSourceKind::Captured { records } => Ok(records.clone()),
        }
    }

    async fn load_content(&self, input: &InputSource) -> Result<String> {
        match &input.source {
            InputSourceKind::File { path } => Ok(tokio::fs::read_to_string(path).await?),
            InputSourceKind::Captured { records } => Ok(records_to_jsonl(records)),
        }
    }
}

/// Parses JSONL text, skipping blank lines.
pub fn parse_jsonl(text: &str) -> Result<Vec<Record>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Record::from_json(line).map_err(RecflowError::from))
        .collect()
}

/// Serializes records as JSONL with a trailing newline.
#[must_use]
pub fn records_to_jsonl(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_json());
        out.push('\n');
    }
    out
}

/// Picks the conversion stage to prepend for a file, by extension.
///
/// JSON-family and unknown extensions need none.
#[must_use]
pub fn detect_input_operation(path: &Path) -> Option<StageConfig> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "csv" => Some(StageConfig::new("fromcsv", ["--header"])),
        "tsv" => Some(StageConfig::new("fromcsv", ["--header", "--delim", "\t"])),
        "xml" => Some(StageConfig::new("fromxml", Vec::<String>::new())),
        _ => None,
    }
}

/// Returns true for extensions read natively as records.
#[must_use]
pub fn is_native_format(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jsonl" | "json" | "ndjson"))
}

/// Details shown before adding a large file as an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSizeWarning {
    /// The file.
    pub path: PathBuf,
    /// File size on disk.
    pub file_bytes: u64,
    /// Rough record count.
    pub estimated_records: u64,
    /// Rough cache footprint if every stage caches a full copy.
    pub projected_cache_bytes: u64,
    /// Set once the user accepts the warning.
    pub acknowledged: bool,
}

impl FileSizeWarning {
    /// Builds a warning for a file of `file_bytes` feeding `stage_count` stages.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, file_bytes: u64, stage_count: usize) -> Self {
        let stages = u64::try_from(stage_count.max(1)).unwrap_or(u64::MAX);
        Self {
            path: path.into(),
            file_bytes,
            estimated_records: file_bytes.div_ceil(ESTIMATED_BYTES_PER_RECORD),
            projected_cache_bytes: file_bytes.saturating_mul(stages),
            acknowledged: false,
        }
    }

    /// Returns true past the danger threshold.
    #[must_use]
    pub const fn is_danger(&self) -> bool {
        self.file_bytes >= FILE_SIZE_DANGER_BYTES
    }

    /// Marks the warning as accepted.
    #[must_use]
    pub const fn acknowledge(mut self) -> Self {
        self.acknowledged = true;
        self
    }
}

/// Returns a warning when `path` is larger than [`FILE_SIZE_WARN_BYTES`].
///
/// `stage_count` is the length of the active fork.
pub async fn check_file_size(path: &Path, stage_count: usize) -> Result<Option<FileSizeWarning>> {
    let file_bytes = tokio::fs::metadata(path).await?.len();
    Ok(check_size(path, file_bytes, stage_count))
}

fn check_size(path: &Path, file_bytes: u64, stage_count: usize) -> Option<FileSizeWarning> {
    (file_bytes > FILE_SIZE_WARN_BYTES).then(|| FileSizeWarning::new(path, file_bytes, stage_count))
}

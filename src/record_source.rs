//! Record source abstraction for where usage records come from.
//!
//! The pipeline only sees [`RecordSource`]; ingestion from upstream providers
//! and durable storage live elsewhere.
//!
//! ## Available Sources
//!
//! - **FileRecordSource**: reads a JSON array, JSON Lines or CSV export
//! - **InMemoryRecordSource**: records already loaded by the caller
//!
//! Both apply the full [`UsageQuery`] (window and filters) in memory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    config::{ConfigError, RecordFormat, SourceConfig},
    models::{UsageQuery, UsageRecord},
};

/// Trait for usage record sources.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch every record matching the query.
    async fn fetch(&self, query: &UsageQuery) -> Result<Vec<UsageRecord>, SourceError>;

    /// Source name for logging.
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON record{}: {source}", .line.map(|l| format!(" on line {l}")).unwrap_or_default())]
    Json {
        line: Option<usize>,
        #[source]
        source: serde_json::Error,
    },

    #[cfg(feature = "csv-input")]
    #[error("invalid CSV record: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reads usage records from a local export file.
#[derive(Debug, Clone)]
pub struct FileRecordSource {
    path: PathBuf,
    format: RecordFormat,
}

impl FileRecordSource {
    pub fn new(path: impl Into<PathBuf>, format: RecordFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Build from configuration. `path` overrides `source.path`.
    pub fn from_config(config: &SourceConfig, path: Option<&Path>) -> Result<Self, SourceError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| config.path.clone())
            .ok_or_else(|| {
                ConfigError::Validation(
                    "no usage record file: set source.path or pass --records".into(),
                )
            })?;
        let format = config.format_for(&path)?;
        Ok(Self::new(path, format))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> RecordFormat {
        self.format
    }
}

#[async_trait]
impl RecordSource for FileRecordSource {
    async fn fetch(&self, query: &UsageQuery) -> Result<Vec<UsageRecord>, SourceError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| SourceError::Io {
                    path: self.path.clone(),
                    source,
                })?;

        let records = parse_records(&contents, self.format)?;
        let total = records.len();
        let matching: Vec<UsageRecord> = records.into_iter().filter(|r| query.matches(r)).collect();

        tracing::debug!(
            path = %self.path.display(),
            format = ?self.format,
            total,
            matching = matching.len(),
            "Usage records loaded"
        );
        Ok(matching)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordSource {
    records: Vec<UsageRecord>,
}

impl InMemoryRecordSource {
    pub fn new(records: Vec<UsageRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn fetch(&self, query: &UsageQuery) -> Result<Vec<UsageRecord>, SourceError> {
        Ok(self
            .records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Parse file contents in the given format.
pub fn parse_records(contents: &str, format: RecordFormat) -> Result<Vec<UsageRecord>, SourceError> {
    match format {
        RecordFormat::Json => {
            serde_json::from_str(contents).map_err(|source| SourceError::Json { line: None, source })
        }
        RecordFormat::Jsonl => contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|source| SourceError::Json {
                    line: Some(i + 1),
                    source,
                })
            })
            .collect(),
        RecordFormat::Csv => parse_csv(contents),
    }
}

#[cfg(feature = "csv-input")]
fn parse_csv(contents: &str) -> Result<Vec<UsageRecord>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());
    reader
        .deserialize()
        .collect::<Result<Vec<UsageRecord>, csv::Error>>()
        .map_err(SourceError::from)
}

#[cfg(not(feature = "csv-input"))]
fn parse_csv(_contents: &str) -> Result<Vec<UsageRecord>, SourceError> {
    Err(ConfigError::Validation("reading CSV records requires the 'csv-input' feature".into()).into())
}

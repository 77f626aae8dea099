use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Where usage records are read from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Usage record file. Can be overridden on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// File format. Inferred from the extension when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<RecordFormat>,

    /// Only read records billed to this API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl SourceConfig {
    /// Format for a given path: explicit setting first, then the extension.
    pub fn format_for(&self, path: &Path) -> Result<RecordFormat, ConfigError> {
        if let Some(format) = self.format {
            return Ok(format);
        }
        RecordFormat::from_path(path).ok_or_else(|| {
            ConfigError::Validation(format!(
                "cannot infer record format from '{}'; set source.format",
                path.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        #[cfg(not(feature = "csv-input"))]
        if self.format == Some(RecordFormat::Csv) {
            return Err(ConfigError::Validation(
                "source.format = \"csv\" requires the 'csv-input' feature".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// A single JSON array of records
    Json,
    /// One JSON record per line
    Jsonl,
    Csv,
}

impl RecordFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(RecordFormat::Json),
            "jsonl" | "ndjson" => Some(RecordFormat::Jsonl),
            "csv" => Some(RecordFormat::Csv),
            _ => None,
        }
    }
}

/// Where run results are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// JSON file receiving persisted forecast rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecasts_path: Option<PathBuf>,

    /// JSON file receiving alerts and the notification digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts_path: Option<PathBuf>,
}

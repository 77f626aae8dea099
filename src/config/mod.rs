//! Configuration for spendcast.
//!
//! Configured via a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [forecast]
//! horizon_days = 14
//! strategy = "ensemble"
//!
//! [thresholds]
//! default_cost_threshold = 100.0
//!
//! [generator]
//! enabled = true
//! api_key = "${OPENAI_API_KEY}"
//! ```

mod forecast;
mod generator;
mod io;
mod observability;
mod thresholds;

use std::path::Path;

pub use forecast::*;
pub use generator::*;
pub use io::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use thresholds::*;

/// Commented default configuration written by `spendcast init`.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../spendcast.example.toml");

/// Root configuration.
///
/// Every section is optional; an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpendcastConfig {
    /// Forecast horizon, strategy and history window.
    #[serde(default)]
    pub forecast: ForecastConfig,

    /// Cost limits for alerting.
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Text-generation endpoint for the generative strategy.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Usage record input.
    #[serde(default)]
    pub source: SourceConfig,

    /// Forecast and alert output files.
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl SpendcastConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: SpendcastConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.forecast.validate()?;
        self.thresholds.validate()?;
        self.generator.validate()?;
        self.source.validate()?;

        if self.forecast.strategy == crate::models::ForecastStrategy::Generative
            && !self.generator.enabled
        {
            tracing::warn!(
                "forecast.strategy is 'generative' but generator.enabled is false; \
                 every model will use the statistical fallback"
            );
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("invalid env var pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::{ForecastStrategy, Timeframe};

/// Forecasting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForecastConfig {
    /// History window fetched from the record source.
    #[serde(default)]
    pub timeframe: Timeframe,

    /// Number of future days to forecast.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: usize,

    /// Forecasting strategy.
    #[serde(default)]
    pub strategy: ForecastStrategy,

    /// Models to forecast. Empty means every model present in the records.
    #[serde(default)]
    pub models: Vec<String>,

    /// Maximum number of model forecasts in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Confidence level stamped on persisted forecast rows.
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::default(),
            horizon_days: default_horizon_days(),
            strategy: ForecastStrategy::default(),
            models: Vec::new(),
            max_concurrency: default_max_concurrency(),
            confidence_level: default_confidence_level(),
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=365).contains(&self.horizon_days) {
            return Err(ConfigError::Validation(format!(
                "forecast.horizon_days must be between 1 and 365, got {}",
                self.horizon_days
            )));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "forecast.max_concurrency must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_level) {
            return Err(ConfigError::Validation(format!(
                "forecast.confidence_level must be between 0 and 1, got {}",
                self.confidence_level
            )));
        }
        Ok(())
    }
}

fn default_horizon_days() -> usize {
    14
}

fn default_max_concurrency() -> usize {
    4
}

fn default_confidence_level() -> f64 {
    0.8
}

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cost thresholds used by the alert evaluator.
///
/// ```toml
/// [thresholds]
/// default_cost_threshold = 100.0
/// usage_ratio_threshold = 0.8
///
/// [[thresholds.overrides]]
/// model = "gpt-4o"
/// cost_threshold = 250.0
///
/// [[thresholds.overrides]]
/// api_key_id = "key-batch-jobs"
/// cost_threshold = 40.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    /// Cost limit (USD) applied when no override matches.
    #[serde(default = "default_cost_threshold")]
    pub default_cost_threshold: f64,

    /// Fraction of the cost limit at which a warning fires.
    #[serde(default = "default_usage_ratio_threshold")]
    pub usage_ratio_threshold: f64,

    /// Whether current-cost alerts are raised per model or per API key.
    #[serde(default)]
    pub current_cost_scope: CurrentCostScope,

    /// Per-model or per-key cost limits.
    #[serde(default)]
    pub overrides: Vec<ThresholdOverride>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            default_cost_threshold: default_cost_threshold(),
            usage_ratio_threshold: default_usage_ratio_threshold(),
            current_cost_scope: CurrentCostScope::default(),
            overrides: Vec::new(),
        }
    }
}

impl ThresholdConfig {
    /// Cost threshold for a model, falling back to the default.
    pub fn cost_threshold_for_model(&self, model: &str) -> f64 {
        self.overrides
            .iter()
            .find(|o| o.model.as_deref() == Some(model))
            .map(|o| o.cost_threshold)
            .unwrap_or(self.default_cost_threshold)
    }

    /// Cost threshold for an API key, falling back to the default.
    pub fn cost_threshold_for_key(&self, api_key_id: &str) -> f64 {
        self.overrides
            .iter()
            .find(|o| o.api_key_id.as_deref() == Some(api_key_id))
            .map(|o| o.cost_threshold)
            .unwrap_or(self.default_cost_threshold)
    }

    /// Cost threshold for a current-cost subject under the configured scope.
    pub fn cost_threshold_for_subject(&self, subject: &str) -> f64 {
        match self.current_cost_scope {
            CurrentCostScope::Model => self.cost_threshold_for_model(subject),
            CurrentCostScope::ApiKey => self.cost_threshold_for_key(subject),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_cost_threshold.is_nan() || self.default_cost_threshold <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "thresholds.default_cost_threshold must be positive, got {}",
                self.default_cost_threshold
            )));
        }
        if self.usage_ratio_threshold.is_nan()
            || self.usage_ratio_threshold <= 0.0
            || self.usage_ratio_threshold > 1.0
        {
            return Err(ConfigError::Validation(format!(
                "thresholds.usage_ratio_threshold must be in (0, 1], got {}",
                self.usage_ratio_threshold
            )));
        }
        for (i, entry) in self.overrides.iter().enumerate() {
            entry
                .validate()
                .map_err(|msg| ConfigError::Validation(format!("thresholds.overrides[{i}]: {msg}")))?;
        }
        Ok(())
    }
}

/// Subject granularity for current-cost alerts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentCostScope {
    #[default]
    Model,
    ApiKey,
}

/// A cost limit for one model or one API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,

    pub cost_threshold: f64,
}

impl ThresholdOverride {
    fn validate(&self) -> Result<(), String> {
        match (&self.model, &self.api_key_id) {
            (Some(_), Some(_)) => return Err("set either model or api_key_id, not both".into()),
            (None, None) => return Err("one of model or api_key_id is required".into()),
            _ => {}
        }
        if self.cost_threshold.is_nan() || self.cost_threshold <= 0.0 {
            return Err(format!(
                "cost_threshold must be positive, got {}",
                self.cost_threshold
            ));
        }
        Ok(())
    }
}

fn default_cost_threshold() -> f64 {
    100.0
}

fn default_usage_ratio_threshold() -> f64 {
    0.8
}

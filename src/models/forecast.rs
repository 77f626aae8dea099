use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Forecasting strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ForecastStrategy {
    /// Exponential smoothing with additive trend (weekly seasonality with two weeks of data)
    Statistical,
    /// Additive regression on a linear trend plus day-of-week seasonality
    #[serde(alias = "prophet")]
    #[cfg_attr(feature = "cli", value(alias = "prophet"))]
    Decomposition,
    /// Elementwise mean of statistical and decomposition
    #[default]
    Ensemble,
    /// Text-generation model prompted with recent history
    #[serde(alias = "llm")]
    #[cfg_attr(feature = "cli", value(alias = "llm"))]
    Generative,
}

impl ForecastStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastStrategy::Statistical => "statistical",
            ForecastStrategy::Decomposition => "decomposition",
            ForecastStrategy::Ensemble => "ensemble",
            ForecastStrategy::Generative => "generative",
        }
    }
}

impl std::fmt::Display for ForecastStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-day predictions for the three forecast channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelForecast {
    pub input_tokens: Vec<f64>,
    pub output_tokens: Vec<f64>,
    pub cost_usd: Vec<f64>,
}

impl ChannelForecast {
    /// Whether every channel has exactly `horizon` values.
    pub fn has_horizon(&self, horizon: usize) -> bool {
        self.input_tokens.len() == horizon
            && self.output_tokens.len() == horizon
            && self.cost_usd.len() == horizon
    }

    /// Replace negative (and non-finite) predictions with zero.
    pub fn clamp_non_negative(mut self) -> Self {
        for values in [
            &mut self.input_tokens,
            &mut self.output_tokens,
            &mut self.cost_usd,
        ] {
            for v in values.iter_mut() {
                if !v.is_finite() || *v < 0.0 {
                    *v = 0.0;
                }
            }
        }
        self
    }
}

/// Forecast for one model over the requested horizon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub model: String,
    /// Consecutive days starting the day after the run date
    pub dates: Vec<NaiveDate>,
    pub input_tokens: Vec<f64>,
    pub output_tokens: Vec<f64>,
    pub cost_usd: Vec<f64>,
    pub total_cost_usd: f64,
    pub total_tokens: f64,
    /// Strategy the caller asked for
    pub requested_strategy: ForecastStrategy,
    /// Strategy whose numbers were actually returned (differs after a fallback)
    pub strategy_used: ForecastStrategy,
}

impl ForecastResult {
    pub fn horizon(&self) -> usize {
        self.dates.len()
    }

    /// Flatten into one row per forecast day for persistence.
    pub fn to_records(&self, meta: &ForecastRecordMeta) -> Vec<ForecastRecord> {
        self.dates
            .iter()
            .enumerate()
            .map(|(i, date)| ForecastRecord {
                run_id: meta.run_id,
                model: self.model.clone(),
                forecast_date: *date,
                input_tokens_forecast: self.input_tokens[i],
                output_tokens_forecast: self.output_tokens[i],
                cost_forecast: self.cost_usd[i],
                strategy: self.strategy_used,
                confidence_level: meta.confidence_level,
                is_latest: true,
                created_at: meta.created_at,
                project_id: meta.project_id.clone(),
                provider: meta.provider.clone(),
            })
            .collect()
    }
}

/// Context stamped onto every persisted forecast row.
#[derive(Debug, Clone)]
pub struct ForecastRecordMeta {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub confidence_level: f64,
    pub project_id: Option<String>,
    pub provider: Option<String>,
}

/// One persisted forecast row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub run_id: Uuid,
    pub model: String,
    pub forecast_date: NaiveDate,
    pub input_tokens_forecast: f64,
    pub output_tokens_forecast: f64,
    pub cost_forecast: f64,
    pub strategy: ForecastStrategy,
    pub confidence_level: f64,
    /// Older rows for the same scope are superseded by the sink
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub provider: Option<String>,
}

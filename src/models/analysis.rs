use std::collections::BTreeMap;

use serde::Serialize;

/// Descriptive statistics for one model's daily series.
///
/// Recomputed on every run; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelAnalysis {
    pub avg_daily_input_tokens: f64,
    pub avg_daily_output_tokens: f64,
    pub avg_daily_cost: f64,
    /// Percentage change between the early and late windows of total tokens
    pub growth_rate_pct: f64,
    /// Standard deviation of day-over-day percentage change in total tokens
    pub volatility_pct: f64,
    pub data_points: usize,
    /// Mean cost over the trailing week (or the whole series if shorter)
    pub last_window_avg_cost: f64,
}

/// Run-level summary of the raw records plus the per-model analyses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataAnalysis {
    pub models: BTreeMap<String, ModelAnalysis>,
    /// Distinct calendar days present in the raw records
    pub total_days: usize,
    /// Rough request count assuming ~1k input tokens per call
    pub total_api_calls_estimate: u64,
    pub total_cost: f64,
}

/// Cost already incurred by one subject (model or API key) in the history window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentCost {
    pub subject: String,
    pub total_cost: f64,
    /// Mean cost over the days the subject was observed
    pub daily_average: f64,
    /// Last observed day's cost over the first's; `None` with a single observed day
    pub trend_ratio: Option<f64>,
    pub observed_days: usize,
}

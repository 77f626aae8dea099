//! Growth, volatility and summary statistics over daily series.
//!
//! Everything here is a pure function of its input.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{DailySeries, DataAnalysis, ModelAnalysis, UsageRecord};

/// Days in the early/late comparison windows and the trailing cost window.
const WINDOW_DAYS: usize = 7;

/// Input tokens per request assumed for the call-count estimate.
const TOKENS_PER_CALL_ESTIMATE: u64 = 1000;

/// Compute descriptive statistics for one model's series.
pub fn analyze(series: &DailySeries) -> ModelAnalysis {
    let points = series.points();
    let totals = series.total_token_values();

    let (growth_rate_pct, volatility_pct) = if points.len() <= 1 {
        (0.0, 0.0)
    } else {
        (growth_rate(&totals), volatility(&totals))
    };

    let last_window_avg_cost = mean(series.tail(WINDOW_DAYS).iter().map(|p| p.cost_usd));

    ModelAnalysis {
        avg_daily_input_tokens: mean(points.iter().map(|p| p.input_tokens as f64)),
        avg_daily_output_tokens: mean(points.iter().map(|p| p.output_tokens as f64)),
        avg_daily_cost: mean(points.iter().map(|p| p.cost_usd)),
        growth_rate_pct,
        volatility_pct,
        data_points: points.len(),
        last_window_avg_cost,
    }
}

/// Run-level summary: per-model analyses plus totals over the raw records.
pub fn summarize(records: &[UsageRecord], series: &BTreeMap<String, DailySeries>) -> DataAnalysis {
    let days: BTreeSet<_> = records.iter().map(UsageRecord::date).collect();
    let total_input: u64 = records.iter().map(|r| r.input_tokens).sum();

    DataAnalysis {
        models: series
            .iter()
            .map(|(model, s)| (model.clone(), analyze(s)))
            .collect(),
        total_days: days.len(),
        total_api_calls_estimate: total_input / TOKENS_PER_CALL_ESTIMATE,
        total_cost: records.iter().map(|r| r.cost_usd).sum(),
    }
}

/// Percentage change from the early window to the late window.
///
/// With at least a week of data the windows are the first and last seven
/// days; otherwise the first and last single days. A zero early window yields 0.
pub fn growth_rate(totals: &[f64]) -> f64 {
    let (start, end) = if totals.len() >= WINDOW_DAYS {
        (
            mean(totals[..WINDOW_DAYS].iter().copied()),
            mean(totals[totals.len() - WINDOW_DAYS..].iter().copied()),
        )
    } else {
        match (totals.first(), totals.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return 0.0,
        }
    };

    if start == 0.0 {
        return 0.0;
    }
    (end / start - 1.0) * 100.0
}

/// Sample standard deviation of day-over-day percentage change, in percent.
///
/// Changes from a zero day are undefined and skipped. Fewer than two samples
/// yield 0.
pub fn volatility(totals: &[f64]) -> f64 {
    let changes: Vec<f64> = totals
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();

    if changes.len() < 2 {
        return 0.0;
    }

    let avg = mean(changes.iter().copied());
    let variance =
        changes.iter().map(|c| (c - avg).powi(2)).sum::<f64>() / (changes.len() - 1) as f64;
    variance.sqrt() * 100.0
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

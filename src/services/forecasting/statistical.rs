//! Exponential smoothing with additive trend.
//!
//! # Algorithm
//!
//! - For data with >= 14 days: MSTL (Multiple Seasonal-Trend decomposition)
//!   with weekly seasonality (period=7) combined with AutoETS for the trend.
//!   This captures weekday vs weekend usage differences.
//!
//! - For data with < 14 days: AutoETS without seasonal decomposition.
//!
//! Each channel is fitted independently. A constant channel short-circuits to
//! a flat forecast. When augurs is not compiled in, or a fit fails or returns
//! non-finite values, the channel falls back to a built-in Holt linear smoother
//! (with additive weekly indices from 14 days on), so this strategy only fails
//! on an empty series.

#[cfg(feature = "forecasting")]
use augurs::{
    ets::AutoETS,
    forecaster::{Forecaster, transforms::LinearInterpolator},
    mstl::MSTLModel,
};

use super::ForecastError;
use crate::models::{ChannelForecast, DailySeries};

/// Minimum data points for seasonal forecasting (two full weeks)
pub const MIN_SEASONAL_DATA_POINTS: usize = 14;

/// Weekly seasonality period (7 days)
const WEEKLY_PERIOD: usize = 7;

/// Prediction interval level requested from augurs; only point forecasts are used
#[cfg(feature = "forecasting")]
const INTERVAL_LEVEL: f64 = 0.95;

/// Holt smoothing factors for level and trend
const ALPHA: f64 = 0.5;
const BETA: f64 = 0.3;

/// Forecast all three channels of a series.
pub fn forecast(series: &DailySeries, horizon: usize) -> Result<ChannelForecast, ForecastError> {
    Ok(ChannelForecast {
        input_tokens: predict_channel(&series.input_values(), horizon)?,
        output_tokens: predict_channel(&series.output_values(), horizon)?,
        cost_usd: predict_channel(&series.cost_values(), horizon)?,
    })
}

/// Forecast one channel `horizon` steps ahead.
pub fn predict_channel(values: &[f64], horizon: usize) -> Result<Vec<f64>, ForecastError> {
    if horizon == 0 {
        return Err(ForecastError::InvalidHorizon(horizon));
    }
    let Some(&last) = values.last() else {
        return Err(ForecastError::InsufficientData {
            required: 1,
            actual: 0,
        });
    };

    if values.iter().all(|v| *v == last) {
        return Ok(vec![last; horizon]);
    }

    #[cfg(feature = "forecasting")]
    match fit_augurs(values, horizon) {
        Ok(points) if points.len() == horizon && points.iter().all(|v| v.is_finite()) => {
            return Ok(points);
        }
        Ok(points) => tracing::debug!(
            len = points.len(),
            "augurs returned an unusable forecast, using built-in smoother"
        ),
        Err(e) => tracing::debug!(error = %e, "augurs fit failed, using built-in smoother"),
    }

    Ok(smooth(values, horizon))
}

#[cfg(feature = "forecasting")]
fn fit_augurs(
    values: &[f64],
    horizon: usize,
) -> Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>> {
    let forecast = if values.len() >= MIN_SEASONAL_DATA_POINTS {
        forecast_with_mstl(values, horizon)?
    } else {
        forecast_with_ets(values, horizon)?
    };
    Ok(forecast.point)
}

/// Forecast using MSTL (seasonal decomposition) with AutoETS trend model.
#[cfg(feature = "forecasting")]
fn forecast_with_mstl(
    values: &[f64],
    horizon: usize,
) -> Result<augurs::Forecast, Box<dyn std::error::Error + Send + Sync>> {
    let ets = AutoETS::non_seasonal().into_trend_model();
    let mstl = MSTLModel::new(vec![WEEKLY_PERIOD], ets);

    // Linear interpolation for any NaN values
    let transformers: Vec<Box<dyn augurs::forecaster::Transformer>> =
        vec![Box::new(LinearInterpolator::default())];
    let mut forecaster = Forecaster::new(mstl).with_transformers(transformers);

    forecaster
        .fit(values)
        .map_err(|e| format!("MSTL fit error: {e}"))?;

    forecaster
        .predict(horizon, INTERVAL_LEVEL)
        .map_err(|e| format!("MSTL predict error: {e}").into())
}

/// Forecast using AutoETS (no seasonal decomposition).
#[cfg(feature = "forecasting")]
fn forecast_with_ets(
    values: &[f64],
    horizon: usize,
) -> Result<augurs::Forecast, Box<dyn std::error::Error + Send + Sync>> {
    let ets = AutoETS::non_seasonal();

    let transformers: Vec<Box<dyn augurs::forecaster::Transformer>> =
        vec![Box::new(LinearInterpolator::default())];
    let mut forecaster = Forecaster::new(ets).with_transformers(transformers);

    forecaster
        .fit(values)
        .map_err(|e| format!("ETS fit error: {e}"))?;

    forecaster
        .predict(horizon, INTERVAL_LEVEL)
        .map_err(|e| format!("ETS predict error: {e}").into())
}

/// Built-in smoother: Holt linear, with additive weekly indices on long series.
fn smooth(values: &[f64], horizon: usize) -> Vec<f64> {
    if values.len() < MIN_SEASONAL_DATA_POINTS {
        return holt_linear(values, horizon);
    }

    let indices = weekly_indices(values);
    let adjusted: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(i, v)| v - indices[i % WEEKLY_PERIOD])
        .collect();

    holt_linear(&adjusted, horizon)
        .into_iter()
        .enumerate()
        .map(|(h, v)| v + indices[(values.len() + h) % WEEKLY_PERIOD])
        .collect()
}

/// Holt's linear method (additive trend, no seasonality).
fn holt_linear(values: &[f64], horizon: usize) -> Vec<f64> {
    let (mut level, mut trend) = match values {
        [] => return vec![0.0; horizon],
        [only] => return vec![*only; horizon],
        [first, second, ..] => (*first, second - first),
    };

    for &y in &values[1..] {
        let previous = level;
        level = ALPHA * y + (1.0 - ALPHA) * (level + trend);
        trend = BETA * (level - previous) + (1.0 - BETA) * trend;
    }

    (1..=horizon).map(|h| level + h as f64 * trend).collect()
}

/// Mean deviation from the series mean per position in the weekly cycle,
/// centred so the indices sum to zero.
fn weekly_indices(values: &[f64]) -> [f64; WEEKLY_PERIOD] {
    let overall = values.iter().sum::<f64>() / values.len() as f64;
    let mut sums = [0.0; WEEKLY_PERIOD];
    let mut counts = [0usize; WEEKLY_PERIOD];
    for (i, v) in values.iter().enumerate() {
        sums[i % WEEKLY_PERIOD] += v - overall;
        counts[i % WEEKLY_PERIOD] += 1;
    }

    let mut indices = [0.0; WEEKLY_PERIOD];
    for k in 0..WEEKLY_PERIOD {
        if counts[k] > 0 {
            indices[k] = sums[k] / counts[k] as f64;
        }
    }
    let centre = indices.iter().sum::<f64>() / WEEKLY_PERIOD as f64;
    indices.iter_mut().for_each(|v| *v -= centre);
    indices
}

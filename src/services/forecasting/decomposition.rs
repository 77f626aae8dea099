//! Additive regression: linear trend plus day-of-week seasonality.
//!
//! Each channel is modelled as `value = intercept + slope * t + season[weekday]`
//! and extended forward from the series' last date. Needs at least two weeks
//! of data so every weekday is observed twice.

use chrono::{Datelike, Duration, NaiveDate};

use super::ForecastError;
use crate::models::{ChannelForecast, DailySeries};

pub const MIN_DATA_POINTS: usize = 14;

const DAYS_PER_WEEK: usize = 7;

pub fn forecast(series: &DailySeries, horizon: usize) -> Result<ChannelForecast, ForecastError> {
    if horizon == 0 {
        return Err(ForecastError::InvalidHorizon(horizon));
    }
    let Some(last_date) = series.last_date() else {
        return Err(ForecastError::InsufficientData {
            required: MIN_DATA_POINTS,
            actual: 0,
        });
    };

    let weekdays: Vec<usize> = series.points().iter().map(|p| weekday(p.date)).collect();
    let future: Vec<usize> = (1..=horizon as i64)
        .map(|h| weekday(last_date + Duration::days(h)))
        .collect();

    Ok(ChannelForecast {
        input_tokens: predict_channel(&series.input_values(), &weekdays, &future)?,
        output_tokens: predict_channel(&series.output_values(), &weekdays, &future)?,
        cost_usd: predict_channel(&series.cost_values(), &weekdays, &future)?,
    })
}

/// Fit one channel and predict the days whose weekdays are given in `future`.
///
/// `weekdays[i]` is the weekday (0 = Monday) of `values[i]`; `future` follows
/// directly after the last observation. Trend and weekday effects are fitted
/// jointly by least squares: the slope comes from values and time indices
/// centred within each weekday, and each weekday's level is its mean value
/// less the trend at its mean time index.
pub fn predict_channel(
    values: &[f64],
    weekdays: &[usize],
    future: &[usize],
) -> Result<Vec<f64>, ForecastError> {
    if values.len() < MIN_DATA_POINTS {
        return Err(ForecastError::InsufficientData {
            required: MIN_DATA_POINTS,
            actual: values.len(),
        });
    }

    let mut sum_t = [0.0; DAYS_PER_WEEK];
    let mut sum_y = [0.0; DAYS_PER_WEEK];
    let mut counts = [0usize; DAYS_PER_WEEK];
    for (t, (&y, &d)) in values.iter().zip(weekdays).enumerate() {
        sum_t[d] += t as f64;
        sum_y[d] += y;
        counts[d] += 1;
    }
    let mean = |sums: &[f64; DAYS_PER_WEEK], d: usize| {
        if counts[d] == 0 {
            0.0
        } else {
            sums[d] / counts[d] as f64
        }
    };

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (t, (&y, &d)) in values.iter().zip(weekdays).enumerate() {
        let dt = t as f64 - mean(&sum_t, d);
        sxy += dt * (y - mean(&sum_y, d));
        sxx += dt * dt;
    }
    if sxx == 0.0 {
        return Err(ForecastError::Model("degenerate trend fit".into()));
    }
    let slope = sxy / sxx;

    // Weekdays never observed take the average level of the observed ones
    let observed: Vec<usize> = (0..DAYS_PER_WEEK).filter(|&d| counts[d] > 0).collect();
    let mut level = [0.0; DAYS_PER_WEEK];
    for &d in &observed {
        level[d] = mean(&sum_y, d) - slope * mean(&sum_t, d);
    }
    let average_level = observed.iter().map(|&d| level[d]).sum::<f64>() / observed.len() as f64;
    for d in 0..DAYS_PER_WEEK {
        if counts[d] == 0 {
            level[d] = average_level;
        }
    }

    let n = values.len();
    let predictions: Vec<f64> = future
        .iter()
        .enumerate()
        .map(|(h, &d)| level[d] + slope * (n + h) as f64)
        .collect();

    if predictions.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::Model(
            "decomposition produced non-finite predictions".into(),
        ));
    }
    Ok(predictions)
}

fn weekday(date: NaiveDate) -> usize {
    date.weekday().num_days_from_monday() as usize
}

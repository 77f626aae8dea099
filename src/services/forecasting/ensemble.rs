use super::{ForecastError, decomposition, statistical};
use crate::models::{ChannelForecast, DailySeries, ForecastStrategy};

/// Elementwise mean of the statistical and decomposition forecasts.
///
/// Returns the strategy whose numbers were produced: `Ensemble` when both
/// fitted, `Statistical` when decomposition failed.
pub fn forecast(
    series: &DailySeries,
    horizon: usize,
) -> Result<(ChannelForecast, ForecastStrategy), ForecastError> {
    let statistical = statistical::forecast(series, horizon)?;
    Ok(combine(
        statistical,
        decomposition::forecast(series, horizon),
        series.model(),
    ))
}

/// Average two forecasts, or return `statistical` unchanged when the
/// decomposition forecast is unavailable.
pub fn combine(
    statistical: ChannelForecast,
    decomposition: Result<ChannelForecast, ForecastError>,
    model: &str,
) -> (ChannelForecast, ForecastStrategy) {
    let horizon = statistical.input_tokens.len();
    match decomposition {
        Ok(decomposition) if decomposition.has_horizon(horizon) => (
            ChannelForecast {
                input_tokens: mean(&statistical.input_tokens, &decomposition.input_tokens),
                output_tokens: mean(&statistical.output_tokens, &decomposition.output_tokens),
                cost_usd: mean(&statistical.cost_usd, &decomposition.cost_usd),
            },
            ForecastStrategy::Ensemble,
        ),
        Ok(_) => {
            tracing::debug!(model, "Decomposition horizon mismatch, ensemble uses statistical only");
            (statistical, ForecastStrategy::Statistical)
        }
        Err(e) => {
            tracing::debug!(model, error = %e, "Decomposition unavailable, ensemble uses statistical only");
            (statistical, ForecastStrategy::Statistical)
        }
    }
}

fn mean(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| (x + y) / 2.0).collect()
}

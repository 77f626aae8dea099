//! Forecast engine: four interchangeable strategies over a daily series.
//!
//! Strategies are stateless functions of `(series, horizon)`. The engine picks
//! one per run, clamps the predictions to be non-negative, checks every channel
//! has exactly `horizon` values and stamps the forecast dates, which always
//! start the day after the run date regardless of how stale the series is.
//!
//! | Strategy        | Fails when                                     | Fallback            |
//! |-----------------|------------------------------------------------|---------------------|
//! | `statistical`   | empty series                                   | none (last resort)  |
//! | `decomposition` | fewer than 14 days, degenerate fit             | none                |
//! | `ensemble`      | empty series                                   | statistical only    |
//! | `generative`    | empty series                                   | statistical         |

pub mod decomposition;
pub mod ensemble;
pub mod generative;
pub mod statistical;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, NaiveDate};
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::{
    config::GeneratorConfig,
    models::{ChannelForecast, DailySeries, ForecastResult, ForecastStrategy},
    providers::{OpenAiTextGenerator, TextGenerator},
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForecastError {
    #[error("insufficient data: need at least {required} days, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid forecast horizon: {0} days")]
    InvalidHorizon(usize),

    #[error("model error: {0}")]
    Model(String),

    #[error("forecast length mismatch: expected {expected} days, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("forecast cancelled")]
    Cancelled,
}

/// Runs forecasts for one or many models.
///
/// Holds the only external dependency any strategy has: the optional text
/// generator used by the generative strategy.
#[derive(Clone)]
pub struct ForecastEngine {
    generator: Option<Arc<dyn TextGenerator>>,
    generator_timeout: Duration,
}

impl std::fmt::Debug for ForecastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastEngine")
            .field("generator", &self.generator.as_ref().map(|g| g.name()))
            .field("generator_timeout", &self.generator_timeout)
            .finish()
    }
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastEngine {
    /// An engine without a text generator. The generative strategy falls back
    /// to statistical for every model.
    pub fn new() -> Self {
        Self {
            generator: None,
            generator_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        self.generator = Some(generator);
        self.generator_timeout = timeout;
        self
    }

    /// Build from configuration, wiring the OpenAI-compatible generator when enabled.
    pub fn from_config(config: &GeneratorConfig, client: reqwest::Client) -> Self {
        let engine = Self::new();
        if !config.enabled {
            return engine;
        }
        let generator = OpenAiTextGenerator::from_config(config, client);
        engine.with_generator(Arc::new(generator), config.timeout())
    }

    /// Forecast one model `horizon` days forward from `today`.
    #[tracing::instrument(skip(self, series), fields(model = series.model()))]
    pub async fn forecast(
        &self,
        series: &DailySeries,
        horizon: usize,
        strategy: ForecastStrategy,
        today: NaiveDate,
    ) -> Result<ForecastResult, ForecastError> {
        if horizon == 0 {
            return Err(ForecastError::InvalidHorizon(horizon));
        }

        let (channels, strategy_used) = match strategy {
            ForecastStrategy::Statistical => (
                statistical::forecast(series, horizon)?,
                ForecastStrategy::Statistical,
            ),
            ForecastStrategy::Decomposition => (
                decomposition::forecast(series, horizon)?,
                ForecastStrategy::Decomposition,
            ),
            ForecastStrategy::Ensemble => ensemble::forecast(series, horizon)?,
            ForecastStrategy::Generative => {
                generative::forecast(
                    series,
                    horizon,
                    self.generator.as_deref(),
                    self.generator_timeout,
                )
                .await?
            }
        };

        let result = finish(
            series.model(),
            channels,
            horizon,
            strategy,
            strategy_used,
            today,
        )?;
        tracing::debug!(
            strategy_used = %result.strategy_used,
            total_cost = result.total_cost_usd,
            "Forecast generated"
        );
        Ok(result)
    }

    /// Forecast every series, at most `max_concurrency` at a time.
    ///
    /// Either every model gets a complete result or the call fails: the first
    /// error or a cancellation drops all in-flight forecasts.
    pub async fn forecast_all(
        &self,
        series: &BTreeMap<String, DailySeries>,
        horizon: usize,
        strategy: ForecastStrategy,
        today: NaiveDate,
        max_concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, ForecastResult>, ForecastError> {
        let tasks = series
            .values()
            .filter(|s| !s.is_empty())
            .map(move |s| async move { self.forecast(s, horizon, strategy, today).await });
        let mut pending = stream::iter(tasks).buffer_unordered(max_concurrency.max(1));

        let mut results = BTreeMap::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ForecastError::Cancelled),
                next = pending.next() => match next {
                    Some(result) => {
                        let result = result?;
                        results.insert(result.model.clone(), result);
                    }
                    None => break,
                },
            }
        }
        Ok(results)
    }
}

fn finish(
    model: &str,
    channels: ChannelForecast,
    horizon: usize,
    requested_strategy: ForecastStrategy,
    strategy_used: ForecastStrategy,
    today: NaiveDate,
) -> Result<ForecastResult, ForecastError> {
    let channels = channels.clamp_non_negative();
    if !channels.has_horizon(horizon) {
        let actual = [
            channels.input_tokens.len(),
            channels.output_tokens.len(),
            channels.cost_usd.len(),
        ]
        .into_iter()
        .find(|len| *len != horizon)
        .unwrap_or(horizon);
        return Err(ForecastError::LengthMismatch {
            expected: horizon,
            actual,
        });
    }

    let dates = (1..=horizon as i64)
        .map(|h| today + ChronoDuration::days(h))
        .collect();
    let total_cost_usd = channels.cost_usd.iter().sum();
    let total_tokens =
        channels.input_tokens.iter().sum::<f64>() + channels.output_tokens.iter().sum::<f64>();

    Ok(ForecastResult {
        model: model.to_string(),
        dates,
        input_tokens: channels.input_tokens,
        output_tokens: channels.output_tokens,
        cost_usd: channels.cost_usd,
        total_cost_usd,
        total_tokens,
        requested_strategy,
        strategy_used,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Datelike;
    use rstest::rstest;

    use super::*;
    use crate::models::DailyUsage;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn series(model: &str, costs: &[f64]) -> DailySeries {
        // Deliberately stale: ends months before `today()`
        let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let points = costs
            .iter()
            .enumerate()
            .map(|(i, &cost)| DailyUsage {
                date: start + ChronoDuration::days(i as i64),
                input_tokens: (cost * 100.0) as u64,
                output_tokens: (cost * 50.0) as u64,
                cost_usd: cost,
            })
            .collect();
        DailySeries::from_dense(model, points).unwrap()
    }

    fn falling(n: usize) -> Vec<f64> {
        (0..n).map(|i| 50.0 - 5.0 * i as f64).collect()
    }

    #[rstest]
    #[case::statistical(ForecastStrategy::Statistical, 7)]
    #[case::decomposition(ForecastStrategy::Decomposition, 7)]
    #[case::ensemble(ForecastStrategy::Ensemble, 30)]
    #[case::generative(ForecastStrategy::Generative, 14)]
    #[tokio::test]
    async fn test_every_strategy_has_horizon_and_non_negative_values(
        #[case] strategy: ForecastStrategy,
        #[case] horizon: usize,
    ) {
        // A steeply falling series pushes trend extrapolation below zero
        let result = ForecastEngine::new()
            .forecast(&series("gpt-4o", &falling(14)), horizon, strategy, today())
            .await
            .unwrap();

        assert_eq!(result.horizon(), horizon);
        assert_eq!(result.input_tokens.len(), horizon);
        assert_eq!(result.output_tokens.len(), horizon);
        assert_eq!(result.cost_usd.len(), horizon);
        for values in [&result.input_tokens, &result.output_tokens, &result.cost_usd] {
            assert!(values.iter().all(|v| *v >= 0.0), "{values:?}");
        }
    }

    #[tokio::test]
    async fn test_dates_start_after_today() {
        let result = ForecastEngine::new()
            .forecast(
                &series("gpt-4o", &[1.0; 10]),
                3,
                ForecastStrategy::Statistical,
                today(),
            )
            .await
            .unwrap();
        let expected: Vec<NaiveDate> = (2..=4)
            .map(|d| NaiveDate::from_ymd_opt(2025, 6, d).unwrap())
            .collect();
        assert_eq!(result.dates, expected);
        assert_eq!(result.dates[0].weekday(), chrono::Weekday::Mon);
    }

    #[tokio::test]
    async fn test_constant_series_scenario() {
        let result = ForecastEngine::new()
            .forecast(
                &series("gpt-4o", &[1.0; 10]),
                7,
                ForecastStrategy::Statistical,
                today(),
            )
            .await
            .unwrap();
        for i in 0..7 {
            assert!((result.input_tokens[i] - 100.0).abs() < 1e-6);
            assert!((result.output_tokens[i] - 50.0).abs() < 1e-6);
            assert!((result.cost_usd[i] - 1.0).abs() < 1e-6);
        }
        assert!((result.total_cost_usd - 7.0).abs() < 1e-6);
        assert!((result.total_tokens - 1050.0).abs() < 1e-6);
        assert_eq!(result.strategy_used, ForecastStrategy::Statistical);
    }

    #[tokio::test]
    async fn test_ensemble_on_short_series_equals_statistical() {
        let engine = ForecastEngine::new();
        let s = series("gpt-4o", &[1.0, 3.0, 2.0, 5.0, 4.0, 6.0, 8.0, 7.0]);

        let ensemble = engine
            .forecast(&s, 7, ForecastStrategy::Ensemble, today())
            .await
            .unwrap();
        let statistical = engine
            .forecast(&s, 7, ForecastStrategy::Statistical, today())
            .await
            .unwrap();

        assert_eq!(ensemble.cost_usd, statistical.cost_usd);
        assert_eq!(ensemble.input_tokens, statistical.input_tokens);
        assert_eq!(ensemble.requested_strategy, ForecastStrategy::Ensemble);
        assert_eq!(ensemble.strategy_used, ForecastStrategy::Statistical);
    }

    #[tokio::test]
    async fn test_decomposition_alone_propagates_failure() {
        let result = ForecastEngine::new()
            .forecast(
                &series("gpt-4o", &[1.0; 5]),
                7,
                ForecastStrategy::Decomposition,
                today(),
            )
            .await;
        assert!(matches!(
            result,
            Err(ForecastError::InsufficientData { required: 14, .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_horizon_rejected() {
        let result = ForecastEngine::new()
            .forecast(
                &series("gpt-4o", &[1.0; 5]),
                0,
                ForecastStrategy::Statistical,
                today(),
            )
            .await;
        assert_eq!(result, Err(ForecastError::InvalidHorizon(0)));
    }

    #[test]
    fn test_finish_rejects_short_channel() {
        let channels = ChannelForecast {
            input_tokens: vec![1.0; 7],
            output_tokens: vec![1.0; 5],
            cost_usd: vec![1.0; 7],
        };
        let result = finish(
            "m",
            channels,
            7,
            ForecastStrategy::Statistical,
            ForecastStrategy::Statistical,
            today(),
        );
        assert_eq!(
            result,
            Err(ForecastError::LengthMismatch {
                expected: 7,
                actual: 5
            })
        );
    }

    #[tokio::test]
    async fn test_forecast_all_covers_every_model() {
        let all: BTreeMap<String, DailySeries> = ["a", "b", "c"]
            .into_iter()
            .map(|m| (m.to_string(), series(m, &[2.0; 10])))
            .collect();

        let results = ForecastEngine::new()
            .forecast_all(
                &all,
                7,
                ForecastStrategy::Statistical,
                today(),
                2,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.values().all(|r| r.horizon() == 7));
        assert_eq!(results["b"].model, "b");
    }

    #[tokio::test]
    async fn test_forecast_all_cancelled_returns_nothing() {
        let all: BTreeMap<String, DailySeries> =
            [("a".to_string(), series("a", &[2.0; 10]))].into_iter().collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ForecastEngine::new()
            .forecast_all(&all, 7, ForecastStrategy::Statistical, today(), 4, &cancel)
            .await;
        assert_eq!(result, Err(ForecastError::Cancelled));
    }

    #[tokio::test]
    async fn test_forecast_all_fails_whole_batch_on_model_error() {
        let all: BTreeMap<String, DailySeries> = [
            ("long".to_string(), series("long", &[2.0; 21])),
            ("short".to_string(), series("short", &[2.0; 5])),
        ]
        .into_iter()
        .collect();

        let result = ForecastEngine::new()
            .forecast_all(
                &all,
                7,
                ForecastStrategy::Decomposition,
                today(),
                4,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ForecastError::InsufficientData { .. })));
    }
}

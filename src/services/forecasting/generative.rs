//! Forecasts produced by a text-generation model.
//!
//! The trailing two weeks of a series are summarised into a prompt asking for
//! a JSON array with one `{input_tokens, output_tokens, cost}` object per day.
//! The reply is parsed defensively and stretched or cut to the horizon. Any
//! failure (no generator, timeout, API error, unparsable reply) falls back to
//! the statistical strategy for this model only.

use std::{fmt::Write as _, time::Duration};

use serde::Deserialize;

use super::{ForecastError, statistical};
use crate::{
    models::{ChannelForecast, DailySeries, ForecastStrategy},
    providers::{GenerationPrompt, GeneratorError, TextGenerator},
};

/// Days of history included in the prompt.
const CONTEXT_DAYS: usize = 14;

/// Trend percentages are only reported with more points than this.
const MIN_TREND_POINTS: usize = 3;

const SYSTEM_PROMPT: &str = "You are an expert data scientist specializing in API usage forecasting. \
You forecast future daily API usage from historical data. \
Answer ONLY with a JSON array of objects, one per future day, each with the numeric keys \
'input_tokens', 'output_tokens' and 'cost'. \
No explanation or other text, just the JSON. Keep values realistic and consistent with the trends.";

/// One forecast day as returned by the model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeneratedDay {
    pub input_tokens: f64,
    pub output_tokens: f64,
    #[serde(alias = "cost_in_usd", alias = "cost_usd")]
    pub cost: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("response contains no JSON array")]
    NoArray,

    #[error("invalid forecast JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("forecast array is empty")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
enum GenerativeError {
    #[error("no text generator configured")]
    Disabled,

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Forecast with the generator, falling back to the statistical strategy.
pub async fn forecast(
    series: &DailySeries,
    horizon: usize,
    generator: Option<&dyn TextGenerator>,
    timeout: Duration,
) -> Result<(ChannelForecast, ForecastStrategy), ForecastError> {
    if horizon == 0 {
        return Err(ForecastError::InvalidHorizon(horizon));
    }

    match try_generate(series, horizon, generator, timeout).await {
        Ok(forecast) => Ok((forecast, ForecastStrategy::Generative)),
        Err(e) => {
            tracing::warn!(
                model = series.model(),
                strategy = "generative",
                error = %e,
                "Generative forecast failed, falling back to statistical"
            );
            Ok((
                statistical::forecast(series, horizon)?,
                ForecastStrategy::Statistical,
            ))
        }
    }
}

async fn try_generate(
    series: &DailySeries,
    horizon: usize,
    generator: Option<&dyn TextGenerator>,
    timeout: Duration,
) -> Result<ChannelForecast, GenerativeError> {
    let generator = generator.ok_or(GenerativeError::Disabled)?;
    let prompt = build_prompt(series, horizon);

    let text = tokio::time::timeout(timeout, generator.generate(&prompt))
        .await
        .map_err(|_| GeneratorError::Timeout(timeout))??;

    Ok(parse_response(&text, horizon)?)
}

/// Summarise the trailing days of a series into a forecasting prompt.
pub fn build_prompt(series: &DailySeries, horizon: usize) -> GenerationPrompt {
    let context = series.tail(CONTEXT_DAYS);

    let mut history = String::new();
    for day in context {
        let _ = writeln!(
            history,
            "Date: {}, Input Tokens: {:.1}, Output Tokens: {:.1}, Cost: ${:.2}",
            day.date, day.input_tokens as f64, day.output_tokens as f64, day.cost_usd
        );
    }

    let inputs: Vec<f64> = context.iter().map(|d| d.input_tokens as f64).collect();
    let outputs: Vec<f64> = context.iter().map(|d| d.output_tokens as f64).collect();
    let costs: Vec<f64> = context.iter().map(|d| d.cost_usd).collect();

    let user = format!(
        "I need a forecast of API usage for the '{model}' model for the next {horizon} days.\n\
         \n\
         Recent daily usage:\n\
         {history}\
         \n\
         Summary statistics:\n\
         - Average daily input tokens: {avg_in:.1}\n\
         - Average daily output tokens: {avg_out:.1}\n\
         - Average daily cost: ${avg_cost:.2}\n\
         - Input tokens trend: {trend_in:.1}% change\n\
         - Output tokens trend: {trend_out:.1}% change\n\
         - Cost trend: {trend_cost:.1}% change\n\
         \n\
         Forecast the next {horizon} days of usage as a JSON array of exactly {horizon} objects \
         with keys 'input_tokens', 'output_tokens' and 'cost'. \
         Factor in day-of-week patterns if they exist.",
        model = series.model(),
        avg_in = average(&inputs),
        avg_out = average(&outputs),
        avg_cost = average(&costs),
        trend_in = window_trend(&inputs),
        trend_out = window_trend(&outputs),
        trend_cost = window_trend(&costs),
    );

    GenerationPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Parse a model reply into a forecast of exactly `horizon` days.
pub fn parse_response(text: &str, horizon: usize) -> Result<ChannelForecast, ParseError> {
    let json = extract_json_array(text).ok_or(ParseError::NoArray)?;
    let days: Vec<GeneratedDay> = serde_json::from_str(json)?;
    if days.is_empty() {
        return Err(ParseError::Empty);
    }

    let days = fit_to_horizon(days, horizon);
    Ok(ChannelForecast {
        input_tokens: days.iter().map(|d| d.input_tokens).collect(),
        output_tokens: days.iter().map(|d| d.output_tokens).collect(),
        cost_usd: days.iter().map(|d| d.cost).collect(),
    })
}

/// Truncate to the first `horizon` days, or pad by repeating the last day.
pub fn fit_to_horizon(mut days: Vec<GeneratedDay>, horizon: usize) -> Vec<GeneratedDay> {
    if let Some(&last) = days.last() {
        days.resize(horizon, last);
    }
    days
}

/// The outermost `[...]` span, which skips code fences and stray prose.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (start < end).then(|| &text[start..=end])
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Percent change from the first to the last value of the window.
fn window_trend(values: &[f64]) -> f64 {
    if values.len() <= MIN_TREND_POINTS {
        return 0.0;
    }
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) if first > 0.0 => (last / first - 1.0) * 100.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use rstest::rstest;

    use super::*;
    use crate::models::DailyUsage;

    fn series(days: usize) -> DailySeries {
        let start = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        let points = (0..days)
            .map(|i| DailyUsage {
                date: start + ChronoDuration::days(i as i64),
                input_tokens: 100 + 10 * i as u64,
                output_tokens: 50,
                cost_usd: 1.0,
            })
            .collect();
        DailySeries::from_dense("gpt-4o", points).unwrap()
    }

    fn days_json(n: usize) -> String {
        let days: Vec<String> = (1..=n)
            .map(|i| {
                format!(
                    r#"{{"input_tokens": {}, "output_tokens": {}, "cost": {}}}"#,
                    i * 100,
                    i * 10,
                    i
                )
            })
            .collect();
        format!("[{}]", days.join(","))
    }

    /// Generator returning a fixed reply (or error) and counting calls.
    struct StubGenerator {
        reply: Result<String, u16>,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    impl StubGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, _prompt: &GenerationPrompt) -> Result<String, GeneratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone().map_err(|status| GeneratorError::Api {
                status,
                message: "stub failure".into(),
            })
        }
    }

    #[test]
    fn test_pads_short_response_with_last_day() {
        let forecast = parse_response(&days_json(5), 7).unwrap();
        assert!(forecast.has_horizon(7));
        assert_eq!(
            forecast.input_tokens,
            vec![100.0, 200.0, 300.0, 400.0, 500.0, 500.0, 500.0]
        );
        assert_eq!(forecast.cost_usd[5], 5.0);
        assert_eq!(forecast.cost_usd[6], 5.0);
    }

    #[test]
    fn test_truncates_long_response() {
        let forecast = parse_response(&days_json(10), 3).unwrap();
        assert_eq!(forecast.output_tokens, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_accepts_code_fences_and_aliases() {
        let text = "Here you go:\n```json\n[{\"input_tokens\": 1, \"output_tokens\": 2, \"cost_in_usd\": 0.5}]\n```";
        let forecast = parse_response(text, 2).unwrap();
        assert_eq!(forecast.cost_usd, vec![0.5, 0.5]);
    }

    #[rstest]
    #[case("I cannot forecast this.")]
    #[case("[]")]
    #[case("[{\"input_tokens\": \"lots\"}]")]
    #[case("[{\"input_tokens\": 1, \"output_tokens\": 2}]")]
    #[case("] [")]
    fn test_rejects_bad_responses(#[case] text: &str) {
        assert!(parse_response(text, 7).is_err());
    }

    #[test]
    fn test_prompt_uses_trailing_two_weeks() {
        let prompt = build_prompt(&series(20), 7);
        assert_eq!(prompt.user.matches("Date: ").count(), 14);
        assert!(!prompt.user.contains("2025-04-06"));
        assert!(prompt.user.contains("2025-04-20"));
        assert!(prompt.user.contains("next 7 days"));
        // Input grows from 160 to 290 over the window
        assert!(prompt.user.contains("Input tokens trend: 81."));
        assert!(prompt.user.contains("Cost trend: 0.0% change"));
    }

    #[test]
    fn test_prompt_trend_needs_more_than_three_days() {
        let prompt = build_prompt(&series(3), 7);
        assert!(prompt.user.contains("Input tokens trend: 0.0% change"));
    }

    #[tokio::test]
    async fn test_generated_forecast_used() {
        let generator = StubGenerator::replying(&days_json(5));
        let (forecast, used) = forecast(&series(10), 7, Some(&generator), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(used, ForecastStrategy::Generative);
        assert_eq!(forecast.input_tokens[6], 500.0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_falls_back_without_generator() {
        let s = series(10);
        let (forecast, used) = forecast(&s, 7, None, Duration::from_secs(5)).await.unwrap();
        assert_eq!(used, ForecastStrategy::Statistical);
        assert_eq!(forecast, statistical::forecast(&s, 7).unwrap());
    }

    #[tokio::test]
    async fn test_falls_back_on_api_error() {
        let generator = StubGenerator {
            reply: Err(503),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let (_, used) = forecast(&series(10), 7, Some(&generator), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(used, ForecastStrategy::Statistical);
    }

    #[tokio::test]
    async fn test_falls_back_on_unparsable_reply() {
        let generator = StubGenerator::replying("Sorry, no.");
        let (forecast, used) = forecast(&series(10), 7, Some(&generator), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(used, ForecastStrategy::Statistical);
        assert!(forecast.has_horizon(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_on_timeout() {
        let generator = StubGenerator {
            delay: Some(Duration::from_secs(60)),
            ..StubGenerator::replying(&days_json(7))
        };
        let (_, used) = forecast(&series(10), 7, Some(&generator), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(used, ForecastStrategy::Statistical);
    }
}

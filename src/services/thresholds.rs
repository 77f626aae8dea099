//! Threshold evaluation: current and forecasted cost against configured limits.
//!
//! An alert fires once a value passes `cost_threshold * usage_ratio_threshold`.
//! It is `critical` at or above the threshold itself, `warning` below it.
//! Evaluation never fails a run: a fault yields no alerts plus a diagnostic.

use std::collections::BTreeMap;

use crate::{
    config::ThresholdConfig,
    models::{Alert, AlertKind, CurrentCost, ForecastResult, Severity},
};

/// Forecasts cheaper than this (USD over the horizon) never alert.
pub const MIN_FORECAST_ALERT_COST: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("invalid cost threshold {threshold} for '{subject}'")]
    InvalidThreshold { subject: String, threshold: f64 },

    #[error("invalid usage ratio threshold {0}")]
    InvalidRatio(f64),

    #[error("non-finite cost {value} for '{subject}'")]
    NonFiniteCost { subject: String, value: f64 },
}

/// Alerts from one evaluation, plus the reason they are empty if evaluation faulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub alerts: Vec<Alert>,
    pub diagnostic: Option<String>,
}

/// Evaluate current costs and forecasts against the thresholds.
///
/// Current-cost alerts come first (in subject order), then forecast alerts
/// (in model order).
pub fn evaluate(
    current: &[CurrentCost],
    forecasts: &BTreeMap<String, ForecastResult>,
    config: &ThresholdConfig,
) -> Evaluation {
    match try_evaluate(current, forecasts, config) {
        Ok(alerts) => Evaluation {
            alerts,
            diagnostic: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Threshold evaluation failed, no alerts emitted");
            Evaluation {
                alerts: Vec::new(),
                diagnostic: Some(e.to_string()),
            }
        }
    }
}

fn try_evaluate(
    current: &[CurrentCost],
    forecasts: &BTreeMap<String, ForecastResult>,
    config: &ThresholdConfig,
) -> Result<Vec<Alert>, EvaluationError> {
    let ratio = config.usage_ratio_threshold;
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(EvaluationError::InvalidRatio(ratio));
    }

    let mut alerts = Vec::new();

    for cost in current {
        let threshold = checked_threshold(
            &cost.subject,
            config.cost_threshold_for_subject(&cost.subject),
        )?;
        let value = checked_cost(&cost.subject, cost.total_cost)?;
        let Some(severity) = classify(value, threshold, ratio) else {
            continue;
        };
        let pct = value / threshold * 100.0;
        alerts.push(Alert {
            kind: AlertKind::CurrentCost,
            severity,
            subject: cost.subject.clone(),
            observed_value: value,
            threshold,
            percentage_of_threshold: pct,
            trend_ratio: cost.trend_ratio,
            daily_average: Some(cost.daily_average),
            message: format!(
                "API usage cost for {} is {pct:.1}% of threshold (${value:.2} / ${threshold:.2})",
                cost.subject
            ),
        });
    }

    for (model, forecast) in forecasts {
        let value = checked_cost(model, forecast.total_cost_usd)?;
        if value < MIN_FORECAST_ALERT_COST {
            continue;
        }
        let threshold = checked_threshold(model, config.cost_threshold_for_model(model))?;
        let Some(severity) = classify(value, threshold, ratio) else {
            continue;
        };
        let pct = value / threshold * 100.0;
        alerts.push(Alert {
            kind: AlertKind::ForecastCost,
            severity,
            subject: model.clone(),
            observed_value: value,
            threshold,
            percentage_of_threshold: pct,
            trend_ratio: None,
            daily_average: None,
            message: format!(
                "Forecasted cost for {model} over the next {} days is {pct:.1}% of threshold (${value:.2} / ${threshold:.2})",
                forecast.horizon()
            ),
        });
    }

    Ok(alerts)
}

/// Severity for a value, or `None` below the warning line.
pub fn classify(value: f64, threshold: f64, ratio: f64) -> Option<Severity> {
    if value >= threshold {
        Some(Severity::Critical)
    } else if value > threshold * ratio {
        Some(Severity::Warning)
    } else {
        None
    }
}

fn checked_threshold(subject: &str, threshold: f64) -> Result<f64, EvaluationError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(threshold)
    } else {
        Err(EvaluationError::InvalidThreshold {
            subject: subject.to_string(),
            threshold,
        })
    }
}

fn checked_cost(subject: &str, value: f64) -> Result<f64, EvaluationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvaluationError::NonFiniteCost {
            subject: subject.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rstest::rstest;

    use super::*;
    use crate::{
        config::{CurrentCostScope, ThresholdOverride},
        models::ForecastStrategy,
    };

    fn forecast(model: &str, total_cost: f64) -> ForecastResult {
        let start = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        ForecastResult {
            model: model.to_string(),
            dates: (0..7).map(|i| start + chrono::Duration::days(i)).collect(),
            input_tokens: vec![0.0; 7],
            output_tokens: vec![0.0; 7],
            cost_usd: vec![total_cost / 7.0; 7],
            total_cost_usd: total_cost,
            total_tokens: 0.0,
            requested_strategy: ForecastStrategy::Statistical,
            strategy_used: ForecastStrategy::Statistical,
        }
    }

    fn forecasts(entries: &[(&str, f64)]) -> BTreeMap<String, ForecastResult> {
        entries
            .iter()
            .map(|(m, c)| (m.to_string(), forecast(m, *c)))
            .collect()
    }

    fn current(subject: &str, total_cost: f64) -> CurrentCost {
        CurrentCost {
            subject: subject.to_string(),
            total_cost,
            daily_average: total_cost / 10.0,
            trend_ratio: Some(1.5),
            observed_days: 10,
        }
    }

    #[test]
    fn test_forecast_warning_scenario() {
        let evaluation = evaluate(
            &[],
            &forecasts(&[("gpt-4o", 85.0)]),
            &ThresholdConfig::default(),
        );

        assert!(evaluation.diagnostic.is_none());
        assert_eq!(evaluation.alerts.len(), 1);
        let alert = &evaluation.alerts[0];
        assert_eq!(alert.kind, AlertKind::ForecastCost);
        assert_eq!(alert.severity, Severity::Warning);
        assert!((alert.percentage_of_threshold - 85.0).abs() < 1e-9);
        assert_eq!(
            alert.message,
            "Forecasted cost for gpt-4o over the next 7 days is 85.0% of threshold ($85.00 / $100.00)"
        );
    }

    #[rstest]
    #[case::below_ratio(80.0, None)]
    #[case::above_ratio(80.01, Some(Severity::Warning))]
    #[case::just_below_threshold(99.99, Some(Severity::Warning))]
    #[case::at_threshold(100.0, Some(Severity::Critical))]
    #[case::over_threshold(250.0, Some(Severity::Critical))]
    fn test_classify_boundaries(#[case] value: f64, #[case] expected: Option<Severity>) {
        assert_eq!(classify(value, 100.0, 0.8), expected);
    }

    #[test]
    fn test_cheap_forecasts_suppressed() {
        let config = ThresholdConfig {
            default_cost_threshold: 0.5,
            ..Default::default()
        };
        let evaluation = evaluate(&[], &forecasts(&[("tiny", 0.99)]), &config);
        assert!(evaluation.alerts.is_empty());

        // Current cost has no low-value filter
        let evaluation = evaluate(&[current("tiny", 0.99)], &BTreeMap::new(), &config);
        assert_eq!(evaluation.alerts.len(), 1);
        assert_eq!(evaluation.alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_model_override_wins() {
        let config = ThresholdConfig {
            overrides: vec![ThresholdOverride {
                model: Some("gpt-4o".to_string()),
                api_key_id: None,
                cost_threshold: 50.0,
            }],
            ..Default::default()
        };
        let evaluation = evaluate(
            &[],
            &forecasts(&[("gpt-4o", 60.0), ("gpt-4o-mini", 60.0)]),
            &config,
        );

        assert_eq!(evaluation.alerts.len(), 1);
        assert_eq!(evaluation.alerts[0].subject, "gpt-4o");
        assert_eq!(evaluation.alerts[0].threshold, 50.0);
        assert_eq!(evaluation.alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_current_cost_alert_by_api_key() {
        let config = ThresholdConfig {
            current_cost_scope: CurrentCostScope::ApiKey,
            overrides: vec![ThresholdOverride {
                model: None,
                api_key_id: Some("key-ops".to_string()),
                cost_threshold: 20.0,
            }],
            ..Default::default()
        };
        let evaluation = evaluate(&[current("key-ops", 18.0)], &BTreeMap::new(), &config);

        let alert = &evaluation.alerts[0];
        assert_eq!(alert.kind, AlertKind::CurrentCost);
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.trend_ratio, Some(1.5));
        assert_eq!(alert.daily_average, Some(1.8));
        assert_eq!(
            alert.message,
            "API usage cost for key-ops is 90.0% of threshold ($18.00 / $20.00)"
        );
    }

    #[test]
    fn test_current_alerts_precede_forecast_alerts() {
        let evaluation = evaluate(
            &[current("b", 90.0)],
            &forecasts(&[("a", 120.0)]),
            &ThresholdConfig::default(),
        );
        let kinds: Vec<AlertKind> = evaluation.alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::CurrentCost, AlertKind::ForecastCost]);
        assert_eq!(Severity::overall(&evaluation.alerts), Some(Severity::Critical));
    }

    #[test]
    fn test_fault_yields_no_alerts_and_diagnostic() {
        let config = ThresholdConfig {
            default_cost_threshold: 0.0,
            ..Default::default()
        };
        let evaluation = evaluate(
            &[current("gpt-4o", 500.0)],
            &forecasts(&[("gpt-4o", 500.0)]),
            &config,
        );
        assert!(evaluation.alerts.is_empty());
        assert!(
            evaluation
                .diagnostic
                .as_deref()
                .is_some_and(|d| d.contains("invalid cost threshold"))
        );
    }

    #[test]
    fn test_non_finite_forecast_is_a_fault() {
        let evaluation = evaluate(
            &[],
            &forecasts(&[("gpt-4o", f64::NAN)]),
            &ThresholdConfig::default(),
        );
        assert!(evaluation.alerts.is_empty());
        assert!(evaluation.diagnostic.is_some());
    }
}

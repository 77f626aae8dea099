//! Raw usage records to dense per-model daily series.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};

use crate::{
    config::CurrentCostScope,
    models::{CurrentCost, DailySeries, DailyUsage, UsageRecord},
};

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("no usage records to aggregate")]
    EmptyInput,

    #[error("daily series for model '{0}' is not contiguous")]
    NotDense(String),
}

/// Group records by (model, calendar day) and build a gapless series per model.
///
/// When `models_of_interest` is empty every model present in `records` is
/// included. Requested models with no records are skipped.
pub fn aggregate(
    records: &[UsageRecord],
    models_of_interest: &BTreeSet<String>,
) -> Result<BTreeMap<String, DailySeries>, AggregationError> {
    if records.is_empty() {
        return Err(AggregationError::EmptyInput);
    }

    let mut by_model: BTreeMap<&str, BTreeMap<NaiveDate, DailyUsage>> = BTreeMap::new();
    for record in records {
        if !models_of_interest.is_empty() && !models_of_interest.contains(&record.model) {
            continue;
        }
        let date = record.date();
        let day = by_model
            .entry(record.model.as_str())
            .or_default()
            .entry(date)
            .or_insert_with(|| DailyUsage::zero(date));
        day.input_tokens += record.input_tokens;
        day.output_tokens += record.output_tokens;
        day.cost_usd += record.cost_usd;
    }

    for model in models_of_interest {
        if !by_model.contains_key(model.as_str()) {
            tracing::debug!(model = %model, "No usage records for requested model, skipping");
        }
    }

    let mut series = BTreeMap::new();
    for (model, days) in by_model {
        let points = fill_gaps(days.into_values());
        let daily = DailySeries::from_dense(model, points)
            .ok_or_else(|| AggregationError::NotDense(model.to_string()))?;
        series.insert(model.to_string(), daily);
    }

    Ok(series)
}

/// Fill missing calendar days between the first and last entry with zeros.
///
/// Entries sharing a date are summed. Filling an already dense series returns
/// it unchanged.
pub fn fill_gaps(points: impl IntoIterator<Item = DailyUsage>) -> Vec<DailyUsage> {
    let mut by_date: BTreeMap<NaiveDate, DailyUsage> = BTreeMap::new();
    for point in points {
        by_date
            .entry(point.date)
            .and_modify(|day| {
                day.input_tokens += point.input_tokens;
                day.output_tokens += point.output_tokens;
                day.cost_usd += point.cost_usd;
            })
            .or_insert(point);
    }

    let (Some(&first), Some(&last)) = (by_date.keys().next(), by_date.keys().next_back()) else {
        return Vec::new();
    };

    let mut filled = Vec::with_capacity(((last - first).num_days() + 1) as usize);
    let mut date = first;
    while date <= last {
        filled.push(
            by_date
                .get(&date)
                .copied()
                .unwrap_or_else(|| DailyUsage::zero(date)),
        );
        date += Duration::days(1);
    }
    filled
}

/// Sum the cost already incurred per subject over the days it was observed.
///
/// Unlike [`aggregate`], no zero days are synthesized: the daily average and
/// trend ratio only consider days with records. Records without an API key are
/// ignored under [`CurrentCostScope::ApiKey`].
pub fn current_costs(records: &[UsageRecord], scope: CurrentCostScope) -> Vec<CurrentCost> {
    let mut by_subject: BTreeMap<&str, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    let mut unattributed = 0usize;

    for record in records {
        let subject = match scope {
            CurrentCostScope::Model => Some(record.model.as_str()),
            CurrentCostScope::ApiKey => record.api_key_id.as_deref(),
        };
        let Some(subject) = subject else {
            unattributed += 1;
            continue;
        };
        *by_subject
            .entry(subject)
            .or_default()
            .entry(record.date())
            .or_insert(0.0) += record.cost_usd;
    }

    if unattributed > 0 {
        tracing::debug!(
            records = unattributed,
            "Ignoring records without an API key for current-cost evaluation"
        );
    }

    by_subject
        .into_iter()
        .map(|(subject, days)| {
            let daily: Vec<f64> = days.into_values().collect();
            let total_cost: f64 = daily.iter().sum();
            let trend_ratio = match (daily.first(), daily.last()) {
                (Some(&first), Some(&last)) if daily.len() >= 2 => {
                    Some(if first == 0.0 { 1.0 } else { last / first })
                }
                _ => None,
            };
            CurrentCost {
                subject: subject.to_string(),
                total_cost,
                daily_average: total_cost / daily.len() as f64,
                trend_ratio,
                observed_days: daily.len(),
            }
        })
        .collect()
}

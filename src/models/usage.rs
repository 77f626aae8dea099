use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single usage observation reported by an upstream provider.
///
/// Records arrive at whatever granularity the provider reports (per request,
/// hourly buckets, daily buckets); only the calendar day of `timestamp` matters
/// once they are aggregated. Field aliases accept the column names used by the
/// usage store (`tokens_input`, `tokens_output`, `cost_in_usd`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    #[serde(alias = "tokens_input")]
    pub input_tokens: u64,
    #[serde(alias = "tokens_output")]
    pub output_tokens: u64,
    /// Cost in US dollars
    #[serde(alias = "cost_in_usd")]
    pub cost_usd: f64,
    /// API key the usage was billed to (None when the provider does not attribute it)
    #[serde(default)]
    pub api_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl UsageRecord {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Aggregated usage for one model on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost in US dollars
    pub cost_usd: f64,
}

impl DailyUsage {
    /// A synthesized entry for a day with no observed usage.
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Gapless per-day usage for one model.
///
/// Dates are strictly increasing by exactly one day with no duplicates. The
/// only way to build one outside this module is through the aggregator, which
/// fills missing days with zero entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySeries {
    model: String,
    points: Vec<DailyUsage>,
}

impl DailySeries {
    /// Wrap points that are already dense. Returns `None` if the dates are not
    /// consecutive calendar days.
    pub fn from_dense(model: impl Into<String>, points: Vec<DailyUsage>) -> Option<Self> {
        if !is_dense(&points) {
            return None;
        }
        Some(Self {
            model: model.into(),
            points,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn points(&self) -> &[DailyUsage] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    pub fn input_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.input_tokens as f64).collect()
    }

    pub fn output_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.output_tokens as f64).collect()
    }

    pub fn cost_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.cost_usd).collect()
    }

    pub fn total_token_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.total_tokens() as f64).collect()
    }

    /// The trailing `n` days (or the whole series if shorter).
    pub fn tail(&self, n: usize) -> &[DailyUsage] {
        let start = self.points.len().saturating_sub(n);
        &self.points[start..]
    }
}

/// Check that dates increase by exactly one day.
pub fn is_dense(points: &[DailyUsage]) -> bool {
    points
        .windows(2)
        .all(|w| w[1].date == w[0].date + Duration::days(1))
}

/// History window to fetch from the record source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Timeframe {
    #[serde(rename = "7d")]
    #[cfg_attr(feature = "cli", value(name = "7d"))]
    Week,
    #[serde(rename = "14d")]
    #[cfg_attr(feature = "cli", value(name = "14d"))]
    TwoWeeks,
    #[default]
    #[serde(rename = "30d")]
    #[cfg_attr(feature = "cli", value(name = "30d"))]
    Month,
    #[serde(rename = "90d")]
    #[cfg_attr(feature = "cli", value(name = "90d"))]
    Quarter,
}

impl Timeframe {
    pub fn days(&self) -> i64 {
        match self {
            Timeframe::Week => 7,
            Timeframe::TwoWeeks => 14,
            Timeframe::Month => 30,
            Timeframe::Quarter => 90,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Week => "7d",
            Timeframe::TwoWeeks => "14d",
            Timeframe::Month => "30d",
            Timeframe::Quarter => "90d",
        }
    }
}

/// Filters applied when fetching usage records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageQuery {
    pub timeframe: Timeframe,
    /// End of the window (inclusive)
    pub end: DateTime<Utc>,
    /// Restrict to these models; empty means all
    pub models: Vec<String>,
    pub api_key_id: Option<String>,
    pub project_id: Option<String>,
    pub provider: Option<String>,
}

impl UsageQuery {
    pub fn start(&self) -> DateTime<Utc> {
        self.end - Duration::days(self.timeframe.days())
    }

    /// Whether a record falls inside the window and passes every filter.
    pub fn matches(&self, record: &UsageRecord) -> bool {
        if record.timestamp < self.start() || record.timestamp > self.end {
            return false;
        }
        if !self.models.is_empty() && !self.models.iter().any(|m| m == &record.model) {
            return false;
        }
        if let Some(key) = &self.api_key_id
            && record.api_key_id.as_ref() != Some(key)
        {
            return false;
        }
        if let Some(project) = &self.project_id
            && record.project_id.as_ref() != Some(project)
        {
            return false;
        }
        if let Some(provider) = &self.provider
            && record.provider.as_ref() != Some(provider)
        {
            return false;
        }
        true
    }
}

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Maximum number of alert lines included in a digest message.
const DIGEST_MAX_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Cost already incurred in the analysis window
    CurrentCost,
    /// Cost predicted over the forecast horizon
    ForecastCost,
}

/// Alert severity. Ordered so that `Critical > Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Above the usage ratio but below the threshold
    Warning,
    /// At or above the threshold
    Critical,
}

impl Severity {
    /// Overall severity of a batch: critical if any alert is critical.
    /// Returns `None` for an empty batch.
    pub fn overall(alerts: &[Alert]) -> Option<Severity> {
        alerts.iter().map(|a| a.severity).max()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// A threshold crossing for one subject (model or API key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    /// Model name or API key id, depending on scope
    pub subject: String,
    pub observed_value: f64,
    pub threshold: f64,
    pub percentage_of_threshold: f64,
    /// Last observed day's cost divided by the first day's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_ratio: Option<f64>,
    /// Mean cost over observed days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_average: Option<f64>,
    pub message: String,
}

/// Human-readable summary of an alert batch, handed to notification collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationDigest {
    pub title: String,
    pub message: String,
    pub summary: String,
    pub severity: Severity,
    pub alert_count: usize,
    pub critical_count: usize,
    pub warning_count: usize,
}

impl NotificationDigest {
    /// Build a digest; `None` when there is nothing to report.
    pub fn from_alerts(alerts: &[Alert]) -> Option<Self> {
        let severity = Severity::overall(alerts)?;
        let critical_count = alerts
            .iter()
            .filter(|a| a.severity == Severity::Critical)
            .count();
        let warning_count = alerts.len() - critical_count;

        let title = format!(
            "ALERT: {} API Usage {}",
            alerts.len(),
            if critical_count == 0 {
                "Warnings"
            } else {
                "Critical Alerts"
            }
        );

        let mut message = String::from("*API Usage Alert*\n\n");
        let _ = writeln!(
            message,
            "We've detected {} alerts related to API usage:",
            alerts.len()
        );
        for alert in alerts.iter().take(DIGEST_MAX_LINES) {
            let _ = writeln!(message, "• {}", alert.message);
        }
        if alerts.len() > DIGEST_MAX_LINES {
            let _ = writeln!(message, "• ... and {} more", alerts.len() - DIGEST_MAX_LINES);
        }
        message.push_str("\n*Recommended Actions:*\n");
        message.push_str("• Review your API usage patterns\n");
        message.push_str("• Consider adjusting your thresholds or budget\n");
        message.push_str("• Check the dashboard for more details\n");

        let summary = format!(
            "{} API usage alerts detected ({} critical, {} warnings)",
            alerts.len(),
            critical_count,
            warning_count
        );

        Some(Self {
            title,
            message,
            summary,
            severity,
            alert_count: alerts.len(),
            critical_count,
            warning_count,
        })
    }
}

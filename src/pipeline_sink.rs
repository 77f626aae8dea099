//! Sink abstraction for where run results are sent.
//!
//! Forecast rows go to a [`ForecastSink`] (persistence), alerts and their
//! digest to an [`AlertSink`] (notification collaborators). Both are
//! fire-and-forget from the pipeline's side: a failed write is logged, never
//! turned into a failed run. Multiple sinks can be enabled simultaneously.
//!
//! ## Available Sinks
//!
//! - **JsonFileSink**: writes forecast rows / alerts to local JSON files
//! - **LogSink**: emits results as structured log events
//! - **MemorySink**: keeps everything in memory, for embedding and tests
//! - **CompositeSink**: fans out to several of the above

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::models::{Alert, ForecastRecord, NotificationDigest};

/// Trait for forecast persistence.
#[async_trait]
pub trait ForecastSink: Send + Sync {
    /// Write a batch of forecast rows. Returns the number of rows written.
    async fn write_forecasts(&self, rows: &[ForecastRecord]) -> Result<usize, SinkError>;

    /// Sink name for logging.
    fn name(&self) -> &'static str;
}

/// Trait for alert delivery.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Hand over a batch of alerts with their digest. Returns the number of alerts accepted.
    async fn send_alerts(
        &self,
        alerts: &[Alert],
        digest: Option<&NotificationDigest>,
    ) -> Result<usize, SinkError>;

    /// Sink name for logging.
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink not configured")]
    NotConfigured,
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON File Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Alert file contents written by [`JsonFileSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertFile {
    pub generated_at: DateTime<Utc>,
    pub alerts: Vec<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<serde_json::Value>,
}

/// Writes results to a local JSON file.
///
/// As a forecast sink the file holds every row ever written; rows for a model
/// and scope that a newer batch covers lose their `is_latest` flag. As an alert
/// sink the file is replaced with the latest batch.
pub struct JsonFileSink {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_rows(&self) -> Result<Vec<ForecastRecord>, SinkError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SinkError> {
        let json = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Mark existing rows superseded by `new_rows` as no longer latest.
pub fn supersede(existing: &mut [ForecastRecord], new_rows: &[ForecastRecord]) {
    for row in existing.iter_mut().filter(|r| r.is_latest) {
        let covered = new_rows.iter().any(|n| {
            n.model == row.model && n.project_id == row.project_id && n.provider == row.provider
        });
        if covered {
            row.is_latest = false;
        }
    }
}

#[async_trait]
impl ForecastSink for JsonFileSink {
    async fn write_forecasts(&self, rows: &[ForecastRecord]) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.lock().await;
        let mut all = self.read_rows().await?;
        supersede(&mut all, rows);
        all.extend_from_slice(rows);
        self.write_json(&all).await?;

        tracing::debug!(
            path = %self.path.display(),
            written = rows.len(),
            total = all.len(),
            "Forecast rows written"
        );
        Ok(rows.len())
    }

    fn name(&self) -> &'static str {
        "json_file"
    }
}

#[async_trait]
impl AlertSink for JsonFileSink {
    async fn send_alerts(
        &self,
        alerts: &[Alert],
        digest: Option<&NotificationDigest>,
    ) -> Result<usize, SinkError> {
        let _guard = self.lock.lock().await;
        let file = AlertFile {
            generated_at: Utc::now(),
            alerts: alerts.to_vec(),
            digest: digest.map(serde_json::to_value).transpose()?,
        };
        self.write_json(&file).await?;
        Ok(alerts.len())
    }

    fn name(&self) -> &'static str {
        "json_file"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Emits results as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ForecastSink for LogSink {
    async fn write_forecasts(&self, rows: &[ForecastRecord]) -> Result<usize, SinkError> {
        let mut models: Vec<&str> = rows.iter().map(|r| r.model.as_str()).collect();
        models.dedup();
        for model in models {
            let cost: f64 = rows
                .iter()
                .filter(|r| r.model == model)
                .map(|r| r.cost_forecast)
                .sum();
            tracing::info!(model, forecast_cost = cost, "Forecast");
        }
        Ok(rows.len())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[async_trait]
impl AlertSink for LogSink {
    async fn send_alerts(
        &self,
        alerts: &[Alert],
        digest: Option<&NotificationDigest>,
    ) -> Result<usize, SinkError> {
        for alert in alerts {
            tracing::warn!(
                kind = ?alert.kind,
                severity = alert.severity.as_str(),
                subject = %alert.subject,
                percentage = alert.percentage_of_threshold,
                "{}",
                alert.message
            );
        }
        if let Some(digest) = digest {
            tracing::info!(severity = digest.severity.as_str(), "{}", digest.summary);
        }
        Ok(alerts.len())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps every forecast row, alert and digest it receives.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<ForecastRecord>>,
    alerts: Mutex<Vec<Alert>>,
    digests: Mutex<Vec<NotificationDigest>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> Vec<ForecastRecord> {
        self.rows.lock().await.clone()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn digests(&self) -> Vec<NotificationDigest> {
        self.digests.lock().await.clone()
    }
}

#[async_trait]
impl ForecastSink for MemorySink {
    async fn write_forecasts(&self, rows: &[ForecastRecord]) -> Result<usize, SinkError> {
        let mut stored = self.rows.lock().await;
        supersede(&mut stored, rows);
        stored.extend_from_slice(rows);
        Ok(rows.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn send_alerts(
        &self,
        alerts: &[Alert],
        digest: Option<&NotificationDigest>,
    ) -> Result<usize, SinkError> {
        self.alerts.lock().await.extend_from_slice(alerts);
        if let Some(digest) = digest {
            self.digests.lock().await.push(digest.clone());
        }
        Ok(alerts.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Composite Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Composite sink that writes to multiple backends.
///
/// Writes are attempted on every sink; a failure in one does not prevent
/// writes to the others. Succeeds if at least one sink succeeded.
#[derive(Default)]
pub struct CompositeSink {
    forecast_sinks: Vec<Arc<dyn ForecastSink>>,
    alert_sinks: Vec<Arc<dyn AlertSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forecast_sink(mut self, sink: Arc<dyn ForecastSink>) -> Self {
        self.forecast_sinks.push(sink);
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.forecast_sinks.is_empty() && self.alert_sinks.is_empty()
    }
}

#[async_trait]
impl ForecastSink for CompositeSink {
    async fn write_forecasts(&self, rows: &[ForecastRecord]) -> Result<usize, SinkError> {
        let mut max_written = None;
        let mut last_error = None;

        for sink in &self.forecast_sinks {
            match sink.write_forecasts(rows).await {
                Ok(written) => {
                    max_written = Some(max_written.unwrap_or(0).max(written));
                    tracing::debug!(sink = sink.name(), written, "Forecast sink write successful");
                }
                Err(e) => {
                    tracing::error!(sink = sink.name(), error = %e, "Forecast sink write failed");
                    last_error = Some(e);
                }
            }
        }

        match max_written {
            Some(written) => Ok(written),
            None => Err(last_error.unwrap_or(SinkError::NotConfigured)),
        }
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

#[async_trait]
impl AlertSink for CompositeSink {
    async fn send_alerts(
        &self,
        alerts: &[Alert],
        digest: Option<&NotificationDigest>,
    ) -> Result<usize, SinkError> {
        let mut max_sent = None;
        let mut last_error = None;

        for sink in &self.alert_sinks {
            match sink.send_alerts(alerts, digest).await {
                Ok(sent) => max_sent = Some(max_sent.unwrap_or(0).max(sent)),
                Err(e) => {
                    tracing::error!(sink = sink.name(), error = %e, "Alert sink write failed");
                    last_error = Some(e);
                }
            }
        }

        match max_sent {
            Some(sent) => Ok(sent),
            None => Err(last_error.unwrap_or(SinkError::NotConfigured)),
        }
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

//! Pipeline coordinator.
//!
//! A run is a strict linear state machine:
//!
//! ```text
//! idle → aggregating → analyzing → forecasting → evaluating → done
//!   └──────────┴────────────┴───────────┴──────────→ error
//! ```
//!
//! Each step takes the [`RunContext`] by value and returns the next one. Once
//! a context is in `error` no further step runs. Evaluation never moves a run
//! to `error`; its faults are recorded as a diagnostic instead.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    aggregation::{self, AggregationError},
    forecasting::{ForecastEngine, ForecastError},
    thresholds::{self, Evaluation},
    trends,
};
use crate::{
    config::{CurrentCostScope, SpendcastConfig, ThresholdConfig},
    events::{EventBus, PipelineEvent},
    models::{
        Alert, CurrentCost, DailySeries, DataAnalysis, ForecastRecordMeta, ForecastResult,
        ForecastStrategy, NotificationDigest, Severity, UsageQuery, UsageRecord,
    },
    pipeline_sink::{AlertSink, ForecastSink},
    record_source::{RecordSource, SourceError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Aggregating,
    Analyzing,
    Forecasting,
    Evaluating,
    Done,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Error)
    }
}

/// Cause recorded on a run that ends in `error`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to load usage records: {0}")]
    Source(#[from] SourceError),

    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("forecasting failed: {0}")]
    Forecast(ForecastError),

    #[error("run cancelled")]
    Cancelled,
}

impl From<ForecastError> for PipelineError {
    fn from(e: ForecastError) -> Self {
        match e {
            ForecastError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Forecast(other),
        }
    }
}

/// Run-scoped state, handed from step to step.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Forecast dates start the day after this
    pub today: NaiveDate,
    pub status: RunStatus,
    pub cause: Option<String>,
    pub records: Arc<[UsageRecord]>,
    pub series: BTreeMap<String, DailySeries>,
    pub analysis: Option<DataAnalysis>,
    pub current_costs: Vec<CurrentCost>,
    pub forecasts: BTreeMap<String, ForecastResult>,
    pub evaluation: Evaluation,
}

impl RunContext {
    pub fn new(records: Vec<UsageRecord>, today: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            today,
            status: RunStatus::Idle,
            cause: None,
            records: records.into(),
            series: BTreeMap::new(),
            analysis: None,
            current_costs: Vec::new(),
            forecasts: BTreeMap::new(),
            evaluation: Evaluation::default(),
        }
    }

    fn advance(mut self, status: RunStatus) -> Self {
        tracing::debug!(run_id = %self.run_id, from = ?self.status, to = ?status, "Run status changed");
        self.status = status;
        self
    }

    fn fail(mut self, error: PipelineError) -> Self {
        tracing::warn!(run_id = %self.run_id, step = ?self.status, error = %error, "Run failed");
        self.status = RunStatus::Error;
        self.cause = Some(error.to_string());
        self
    }
}

/// What a run produced. In `error` only the cause is present.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<DataAnalysis>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub current_costs: Vec<CurrentCost>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub forecasts: BTreeMap<String, ForecastResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<NotificationDigest>,
    /// Why evaluation produced no alerts, if it faulted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_diagnostic: Option<String>,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }
}

impl From<RunContext> for RunReport {
    fn from(ctx: RunContext) -> Self {
        if ctx.status != RunStatus::Done {
            return Self {
                run_id: ctx.run_id,
                status: ctx.status,
                cause: ctx.cause,
                analysis: None,
                current_costs: Vec::new(),
                forecasts: BTreeMap::new(),
                alerts: Vec::new(),
                severity: None,
                digest: None,
                evaluation_diagnostic: None,
            };
        }

        let alerts = ctx.evaluation.alerts;
        Self {
            run_id: ctx.run_id,
            status: ctx.status,
            cause: None,
            analysis: ctx.analysis,
            current_costs: ctx.current_costs,
            forecasts: ctx.forecasts,
            severity: Severity::overall(&alerts),
            digest: NotificationDigest::from_alerts(&alerts),
            alerts,
            evaluation_diagnostic: ctx.evaluation.diagnostic,
        }
    }
}

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub horizon_days: usize,
    pub strategy: ForecastStrategy,
    /// Models to forecast; empty means every model in the records
    pub models: BTreeSet<String>,
    pub max_concurrency: usize,
    pub thresholds: ThresholdConfig,
    /// Stamped on persisted forecast rows
    pub confidence_level: f64,
    pub project_id: Option<String>,
    pub provider: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&SpendcastConfig::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &SpendcastConfig) -> Self {
        Self {
            horizon_days: config.forecast.horizon_days,
            strategy: config.forecast.strategy,
            models: config.forecast.models.iter().cloned().collect(),
            max_concurrency: config.forecast.max_concurrency,
            thresholds: config.thresholds.clone(),
            confidence_level: config.forecast.confidence_level,
            project_id: config.source.project_id.clone(),
            provider: config.source.provider.clone(),
        }
    }
}

/// Sequences aggregation, analysis, forecasting and evaluation for one run.
pub struct Pipeline {
    engine: ForecastEngine,
    options: PipelineOptions,
    events: Option<EventBus>,
    forecast_sink: Option<Arc<dyn ForecastSink>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
}

impl Pipeline {
    pub fn new(engine: ForecastEngine, options: PipelineOptions) -> Self {
        Self {
            engine,
            options,
            events: None,
            forecast_sink: None,
            alert_sink: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_forecast_sink(mut self, sink: Arc<dyn ForecastSink>) -> Self {
        self.forecast_sink = Some(sink);
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Fetch records from `source`, run, and hand results to the sinks.
    #[tracing::instrument(skip_all, fields(source = source.name()))]
    pub async fn execute(
        &self,
        source: &dyn RecordSource,
        query: &UsageQuery,
        today: NaiveDate,
        cancel: &CancellationToken,
    ) -> RunReport {
        let ctx = match source.fetch(query).await {
            Ok(records) => self.run_steps(RunContext::new(records, today), cancel).await,
            Err(e) => RunContext::new(Vec::new(), today).fail(e.into()),
        };
        self.finish(ctx).await
    }

    /// Run every step over records already in hand.
    pub async fn run(
        &self,
        records: Vec<UsageRecord>,
        today: NaiveDate,
        cancel: &CancellationToken,
    ) -> RunReport {
        let ctx = self
            .run_steps(RunContext::new(records, today), cancel)
            .await;
        self.finish(ctx).await
    }

    /// Drive a context through every step until it is done or failed.
    pub async fn run_steps(&self, mut ctx: RunContext, cancel: &CancellationToken) -> RunContext {
        tracing::info!(
            run_id = %ctx.run_id,
            records = ctx.records.len(),
            strategy = %self.options.strategy,
            horizon_days = self.options.horizon_days,
            "Pipeline run started"
        );

        while !ctx.status.is_terminal() {
            if cancel.is_cancelled() {
                return ctx.fail(PipelineError::Cancelled);
            }
            ctx = match ctx.status {
                RunStatus::Idle => ctx.advance(RunStatus::Aggregating),
                RunStatus::Aggregating => self.aggregate(ctx),
                RunStatus::Analyzing => self.analyze(ctx),
                RunStatus::Forecasting => self.forecast(ctx, cancel).await,
                RunStatus::Evaluating => self.evaluate(ctx),
                RunStatus::Done | RunStatus::Error => ctx,
            };
        }
        ctx
    }

    fn aggregate(&self, mut ctx: RunContext) -> RunContext {
        match aggregation::aggregate(&ctx.records, &self.options.models) {
            Ok(series) => {
                tracing::debug!(models = series.len(), "Records aggregated");
                ctx.series = series;
                ctx.advance(RunStatus::Analyzing)
            }
            Err(e) => ctx.fail(e.into()),
        }
    }

    fn analyze(&self, mut ctx: RunContext) -> RunContext {
        ctx.analysis = Some(trends::summarize(&ctx.records, &ctx.series));

        let scope = self.options.thresholds.current_cost_scope;
        let relevant: Vec<UsageRecord> = match scope {
            // Current cost per model covers the same models as the forecasts
            CurrentCostScope::Model => ctx
                .records
                .iter()
                .filter(|r| ctx.series.contains_key(&r.model))
                .cloned()
                .collect(),
            CurrentCostScope::ApiKey => ctx.records.to_vec(),
        };
        ctx.current_costs = aggregation::current_costs(&relevant, scope);
        ctx.advance(RunStatus::Forecasting)
    }

    async fn forecast(&self, mut ctx: RunContext, cancel: &CancellationToken) -> RunContext {
        let result = self
            .engine
            .forecast_all(
                &ctx.series,
                self.options.horizon_days,
                self.options.strategy,
                ctx.today,
                self.options.max_concurrency,
                cancel,
            )
            .await;

        match result {
            Ok(forecasts) => {
                for forecast in forecasts.values() {
                    self.publish(PipelineEvent::ForecastGenerated {
                        run_id: ctx.run_id,
                        timestamp: Utc::now(),
                        model: forecast.model.clone(),
                        requested_strategy: forecast.requested_strategy,
                        strategy_used: forecast.strategy_used,
                        horizon_days: forecast.horizon(),
                        total_cost_usd: forecast.total_cost_usd,
                        total_tokens: forecast.total_tokens,
                    });
                }
                ctx.forecasts = forecasts;
                ctx.advance(RunStatus::Evaluating)
            }
            Err(e) => ctx.fail(e.into()),
        }
    }

    fn evaluate(&self, mut ctx: RunContext) -> RunContext {
        ctx.evaluation =
            thresholds::evaluate(&ctx.current_costs, &ctx.forecasts, &self.options.thresholds);

        for alert in &ctx.evaluation.alerts {
            self.publish(PipelineEvent::AlertRaised {
                run_id: ctx.run_id,
                timestamp: Utc::now(),
                kind: alert.kind,
                severity: alert.severity,
                subject: alert.subject.clone(),
                percentage_of_threshold: alert.percentage_of_threshold,
                message: alert.message.clone(),
            });
        }
        ctx.advance(RunStatus::Done)
    }

    /// Publish the outcome, deliver results to sinks and build the report.
    async fn finish(&self, ctx: RunContext) -> RunReport {
        let run_id = ctx.run_id;
        let created_at = Utc::now();
        let report = RunReport::from(ctx);

        match report.status {
            RunStatus::Done => {
                tracing::info!(
                    run_id = %run_id,
                    models = report.forecasts.len(),
                    alerts = report.alerts.len(),
                    "Pipeline run completed"
                );
                self.deliver(&report, created_at).await;
                self.publish(PipelineEvent::RunCompleted {
                    run_id,
                    timestamp: created_at,
                    models_forecast: report.forecasts.len(),
                    alert_count: report.alerts.len(),
                    severity: report.severity,
                });
            }
            _ => self.publish(PipelineEvent::RunFailed {
                run_id,
                timestamp: created_at,
                cause: report.cause.clone().unwrap_or_default(),
            }),
        }
        report
    }

    async fn deliver(&self, report: &RunReport, created_at: chrono::DateTime<Utc>) {
        if let Some(sink) = &self.forecast_sink {
            let meta = ForecastRecordMeta {
                run_id: report.run_id,
                created_at,
                confidence_level: self.options.confidence_level,
                project_id: self.options.project_id.clone(),
                provider: self.options.provider.clone(),
            };
            let rows: Vec<_> = report
                .forecasts
                .values()
                .flat_map(|f| f.to_records(&meta))
                .collect();
            if let Err(e) = sink.write_forecasts(&rows).await {
                tracing::warn!(sink = sink.name(), error = %e, "Failed to write forecasts");
            }
        }

        if let Some(sink) = &self.alert_sink
            && let Err(e) = sink.send_alerts(&report.alerts, report.digest.as_ref()).await
        {
            tracing::warn!(sink = sink.name(), error = %e, "Failed to send alerts");
        }
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

//! Event broadcasting for pipeline results.
//!
//! The pipeline publishes what it produced (forecasts, alerts, the run outcome)
//! to an [`EventBus`]; collaborators that persist or dispatch results subscribe
//! without the pipeline knowing about them.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │    Pipeline     │────>│    EventBus     │────>│  Subscribers    │
//! │ (forecast, eval)│     │  (broadcast)    │     │ (storage, chat) │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut rx = event_bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     if event.topic() == EventTopic::Alert { /* notify */ }
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{AlertKind, ForecastStrategy, Severity};

/// Default channel capacity for the event bus.
/// Slow receivers start missing events (lagging) once this many are buffered.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event topics for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    /// A model forecast was produced
    Forecast,
    /// A threshold crossing was detected
    Alert,
    /// A run finished (successfully or not)
    Run,
    /// All events (wildcard subscription)
    All,
}

impl EventTopic {
    /// `All` matches everything, otherwise exact match is required.
    pub fn matches(&self, other: &EventTopic) -> bool {
        matches!(self, EventTopic::All) || matches!(other, EventTopic::All) || self == other
    }
}

/// Events published by a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ForecastGenerated {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        model: String,
        requested_strategy: ForecastStrategy,
        strategy_used: ForecastStrategy,
        horizon_days: usize,
        total_cost_usd: f64,
        total_tokens: f64,
    },

    AlertRaised {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        kind: AlertKind,
        severity: Severity,
        subject: String,
        percentage_of_threshold: f64,
        message: String,
    },

    RunCompleted {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        models_forecast: usize,
        alert_count: usize,
        /// Highest severity among the alerts, if any
        severity: Option<Severity>,
    },

    RunFailed {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        cause: String,
    },
}

impl PipelineEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            PipelineEvent::ForecastGenerated { .. } => EventTopic::Forecast,
            PipelineEvent::AlertRaised { .. } => EventTopic::Alert,
            PipelineEvent::RunCompleted { .. } | PipelineEvent::RunFailed { .. } => {
                EventTopic::Run
            }
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::ForecastGenerated { .. } => "forecast_generated",
            PipelineEvent::AlertRaised { .. } => "alert_raised",
            PipelineEvent::RunCompleted { .. } => "run_completed",
            PipelineEvent::RunFailed { .. } => "run_failed",
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            PipelineEvent::ForecastGenerated { run_id, .. }
            | PipelineEvent::AlertRaised { run_id, .. }
            | PipelineEvent::RunCompleted { run_id, .. }
            | PipelineEvent::RunFailed { run_id, .. } => *run_id,
        }
    }
}

/// Central event bus for broadcasting pipeline events.
///
/// Uses a tokio broadcast channel so multiple subscribers receive the same
/// events. Events are cloned for each subscriber.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
    events_published: AtomicU64,
    /// Events published while nobody was subscribed
    events_dropped: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event; 0 if there
    /// were none, in which case the event is dropped.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// A receiver that falls behind gets `RecvError::Lagged` with the number
    /// of missed events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        // Clones share the underlying channel; counters are snapshotted
        Self {
            sender: self.sender.clone(),
            events_published: AtomicU64::new(self.events_published.load(Ordering::Relaxed)),
            events_dropped: AtomicU64::new(self.events_dropped.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_failed(cause: &str) -> PipelineEvent {
        PipelineEvent::RunFailed {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            cause: cause.to_string(),
        }
    }

    fn alert_raised() -> PipelineEvent {
        PipelineEvent::AlertRaised {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: AlertKind::ForecastCost,
            severity: Severity::Warning,
            subject: "gpt-4o".to_string(),
            percentage_of_threshold: 85.0,
            message: "Forecasted cost for gpt-4o is 85.0% of threshold".to_string(),
        }
    }

    #[test]
    fn test_event_topic_matches() {
        assert!(EventTopic::All.matches(&EventTopic::Alert));
        assert!(EventTopic::Alert.matches(&EventTopic::All));
        assert!(EventTopic::Run.matches(&EventTopic::Run));
        assert!(!EventTopic::Forecast.matches(&EventTopic::Alert));
    }

    #[test]
    fn test_event_topic_and_type() {
        let event = alert_raised();
        assert_eq!(event.topic(), EventTopic::Alert);
        assert_eq!(event.event_type(), "alert_raised");

        let event = run_failed("run cancelled");
        assert_eq!(event.topic(), EventTopic::Run);
        assert_eq!(event.event_type(), "run_failed");
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(run_failed("boom")), 0);
        assert_eq!(bus.events_published(), 1);
        assert_eq!(bus.events_dropped(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = alert_raised();
        let run_id = event.run_id();
        assert_eq!(bus.publish(event), 2);

        assert_eq!(rx1.recv().await.unwrap().run_id(), run_id);
        assert_eq!(rx2.recv().await.unwrap().event_type(), "alert_raised");
        assert_eq!(bus.events_dropped(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for i in 0..4 {
            bus.publish(run_failed(&format!("failure {i}")));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        let PipelineEvent::RunFailed { cause, .. } = rx.recv().await.unwrap() else {
            panic!("expected run_failed");
        };
        assert_eq!(cause, "failure 2");
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(alert_raised()).unwrap();
        assert_eq!(json["event_type"], "alert_raised");
        assert_eq!(json["kind"], "forecast_cost");
        assert_eq!(json["severity"], "warning");

        let completed = PipelineEvent::RunCompleted {
            run_id: Uuid::nil(),
            timestamp: Utc::now(),
            models_forecast: 2,
            alert_count: 0,
            severity: None,
        };
        let round: PipelineEvent =
            serde_json::from_str(&serde_json::to_string(&completed).unwrap()).unwrap();
        assert_eq!(round.event_type(), "run_completed");
    }
}

//! Daily LLM API usage analysis, cost forecasting and threshold alerting.
//!
//! Raw usage records flow strictly forward through the pipeline:
//!
//! ```text
//! RecordSource → aggregation → { trends, forecasting } → thresholds → sinks / events
//! ```
//!
//! See [`services::Pipeline`] for the entry point.

pub mod config;
pub mod events;
pub mod models;
#[cfg(feature = "cli")]
pub mod observability;
pub mod pipeline_sink;
pub mod providers;
pub mod record_source;
pub mod services;

#[cfg(test)]
mod tests;

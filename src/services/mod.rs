//! The forecasting and alerting pipeline, leaf-first:
//! aggregation → trends → forecasting → thresholds, sequenced by the pipeline.

pub mod aggregation;
pub mod forecasting;
pub mod pipeline;
pub mod thresholds;
pub mod trends;

pub use aggregation::AggregationError;
pub use forecasting::{ForecastEngine, ForecastError};
pub use pipeline::{
    Pipeline, PipelineError, PipelineOptions, RunContext, RunReport, RunStatus,
};
pub use thresholds::{Evaluation, EvaluationError};

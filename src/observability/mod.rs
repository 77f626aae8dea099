//! Observability: structured logging setup for the binary.

mod tracing_init;

pub use tracing_init::*;

// observability/mod.rs - Tracing and Metrics

//! Structured logging and Prometheus metrics for the agent.
//!
//! # Example
//!
//! ```ignore
//! use minio_agent::observability::{init_metrics, init_tracing, MetricsConfig, TracingConfig};
//!
//! init_tracing(TracingConfig::default());
//! let handle = init_metrics(MetricsConfig::default())?;
//! ```

mod metrics;
mod tracing_setup;

pub use metrics::{
    ClusterMetrics, HookMetrics, MetricsConfig, MetricsError, MetricsHandle, RestartMetrics,
    init_metrics, record_deferred, record_evaluation, record_peers_gone, record_readiness,
    record_restart,
};

pub use tracing_setup::{TracingConfig, TracingFormat, init_tracing};

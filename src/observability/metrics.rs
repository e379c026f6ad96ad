// observability/metrics.rs - Prometheus Metrics

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Configuration for metrics
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Address to expose metrics endpoint
    pub listen_addr: SocketAddr,

    /// Histogram buckets for hook evaluation time (in seconds)
    pub evaluation_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            evaluation_buckets: vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        }
    }
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to build metrics exporter: {0}")]
    Build(#[from] BuildError),
}

/// Handle to the Prometheus metrics exporter
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
    ready: Arc<AtomicBool>,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Flip the `/ready` probe
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Hook evaluation metrics
pub struct HookMetrics;

impl HookMetrics {
    pub const EVALUATIONS_TOTAL: &'static str = "minio_agent_hook_evaluations_total";
    pub const EVALUATION_SECONDS: &'static str = "minio_agent_hook_evaluation_seconds";
    pub const DEFERRED_TOTAL: &'static str = "minio_agent_deferred_events_total";
}

/// Restart coordination metrics
pub struct RestartMetrics;

impl RestartMetrics {
    pub const RESTARTS_TOTAL: &'static str = "minio_agent_restarts_total";
}

/// Cluster membership metrics
pub struct ClusterMetrics;

impl ClusterMetrics {
    pub const UNITS: &'static str = "minio_agent_cluster_units";
    pub const DISKS: &'static str = "minio_agent_cluster_disks";
    pub const READY: &'static str = "minio_agent_cluster_ready";
    pub const PEERS_GONE: &'static str = "minio_agent_peers_gone";
}

/// Initialize the metrics system
///
/// Starts an HTTP server on the configured address to expose Prometheus metrics.
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: MetricsConfig) -> Result<MetricsHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HookMetrics::EVALUATION_SECONDS.into()),
            &config.evaluation_buckets,
        )?
        .install_recorder()?;

    let metrics_handle = MetricsHandle {
        handle,
        ready: Arc::new(AtomicBool::new(false)),
    };

    let listen_addr = config.listen_addr;
    let server_handle = metrics_handle.clone();

    tokio::spawn(async move {
        use axum::{Json, Router, http::StatusCode, routing::get};
        use serde::Serialize;

        #[derive(Serialize)]
        struct HealthResponse {
            status: &'static str,
            version: &'static str,
            uptime_secs: u64,
        }

        let start_time = std::time::Instant::now();

        let render_handle = server_handle.clone();
        let ready_handle = server_handle;
        let app = Router::new()
            .route(
                "/metrics",
                get(move || {
                    let h = render_handle.clone();
                    async move { h.render() }
                }),
            )
            .route(
                "/health",
                get(move || {
                    let uptime = start_time.elapsed().as_secs();
                    async move {
                        Json(HealthResponse {
                            status: "healthy",
                            version: env!("CARGO_PKG_VERSION"),
                            uptime_secs: uptime,
                        })
                    }
                }),
            )
            .route(
                "/ready",
                get(move || {
                    let ready = ready_handle.is_ready();
                    async move {
                        if ready {
                            StatusCode::OK
                        } else {
                            StatusCode::SERVICE_UNAVAILABLE
                        }
                    }
                }),
            )
            .route("/live", get(|| async { StatusCode::OK }));

        match tokio::net::TcpListener::bind(listen_addr).await {
            Ok(listener) => {
                tracing::info!(addr = %listen_addr, "Metrics HTTP server started");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "Metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, addr = %listen_addr, "Failed to bind metrics server");
            }
        }
    });

    describe_counter!(
        HookMetrics::EVALUATIONS_TOTAL,
        "Total number of hook evaluations"
    );
    describe_histogram!(
        HookMetrics::EVALUATION_SECONDS,
        "Hook evaluation time in seconds"
    );
    describe_counter!(
        HookMetrics::DEFERRED_TOTAL,
        "Total number of deferred events"
    );
    describe_counter!(
        RestartMetrics::RESTARTS_TOTAL,
        "Total number of restart attempts by outcome"
    );
    describe_gauge!(ClusterMetrics::UNITS, "Units observed in the peer relation");
    describe_gauge!(ClusterMetrics::DISKS, "Disks contributed by all units");
    describe_gauge!(ClusterMetrics::READY, "Whether the cluster reached quorum");
    describe_gauge!(
        ClusterMetrics::PEERS_GONE,
        "Peers that left without a graceful handshake"
    );

    tracing::info!(addr = %config.listen_addr, "Metrics initialized");

    Ok(metrics_handle)
}

// Recording functions

/// Record one hook evaluation
pub fn record_evaluation(event: &str, duration: Duration) {
    counter!(HookMetrics::EVALUATIONS_TOTAL, "event" => event.to_string()).increment(1);
    histogram!(HookMetrics::EVALUATION_SECONDS, "event" => event.to_string())
        .record(duration.as_secs_f64());
}

/// Record an event being deferred
pub fn record_deferred(event: &str) {
    counter!(HookMetrics::DEFERRED_TOTAL, "event" => event.to_string()).increment(1);
}

/// Record the outcome of a restart attempt
pub fn record_restart(outcome: &str) {
    counter!(RestartMetrics::RESTARTS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Record the membership observed by the last readiness check
pub fn record_readiness(units: usize, disks: u32, ready: bool) {
    gauge!(ClusterMetrics::UNITS).set(units as f64);
    gauge!(ClusterMetrics::DISKS).set(f64::from(disks));
    gauge!(ClusterMetrics::READY).set(if ready { 1.0 } else { 0.0 });
}

/// Record the published `peers_gone` counter
pub fn record_peers_gone(count: i64) {
    gauge!(ClusterMetrics::PEERS_GONE).set(count as f64);
}

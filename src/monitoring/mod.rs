// monitoring/mod.rs - External Monitoring Integrations

//! Registration of the Minio endpoint with Prometheus and NRPE.

mod nrpe;
mod prometheus;

pub use nrpe::{NRPE_RELATION, NrpeCheck};
pub use prometheus::{
    CA_FILE_PLACEHOLDER, PROMETHEUS_RELATION, PrometheusPublisher, ScrapeJob, StaticConfig,
    TlsConfig,
};

use thiserror::Error;

use crate::relation::DirectoryError;

#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Relation error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

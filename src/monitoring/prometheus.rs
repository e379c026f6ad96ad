// monitoring/prometheus.rs - Prometheus Scrape Jobs

use serde::{Deserialize, Serialize};
use tracing::info;

use super::MonitoringError;
use crate::relation::{LeaderToken, PeerDirectory, UnitId};

/// Relation the scrape jobs are published on
pub const PROMETHEUS_RELATION: &str = "prometheus-manual";

/// Placeholder the Prometheus side replaces with the CA file it stored
pub const CA_FILE_PLACEHOLDER: &str = "__ca_file__";

const CA_CERT_KEY: &str = "ca_cert";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfig {
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca_file: String,
}

/// Scrape job descriptor understood by the Prometheus side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub job_name: String,
    pub static_configs: Vec<StaticConfig>,
    pub scheme: String,
    pub metrics_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
}

impl ScrapeJob {
    fn new(job_name: String, target: String, metrics_path: String, secure: bool) -> Self {
        Self {
            job_name,
            static_configs: vec![StaticConfig {
                targets: vec![target],
            }],
            scheme: if secure { "https" } else { "http" }.into(),
            metrics_path,
            tls_config: secure.then(|| TlsConfig {
                ca_file: CA_FILE_PLACEHOLDER.into(),
            }),
        }
    }

    /// Cluster-wide job, registered once by the leader
    pub fn cluster(app: &str, endpoint: &str, port: u16, metrics_path: &str, secure: bool) -> Self {
        Self::new(
            format!("{}_cluster", app),
            format!("{}:{}", endpoint, port),
            format!("{}cluster", metrics_path),
            secure,
        )
    }

    /// Per-node job, registered by every unit
    pub fn node(unit: &UnitId, endpoint: &str, port: u16, metrics_path: &str, secure: bool) -> Self {
        Self::new(
            format!("{}_node", unit.slug()),
            format!("{}:{}", endpoint, port),
            format!("{}node", metrics_path),
            secure,
        )
    }

    /// Relation key the job is published under
    pub fn request_key(&self) -> String {
        format!("request_{}", self.job_name)
    }

    fn encode(&self) -> Result<String, MonitoringError> {
        serde_json::to_string(self).map_err(|e| MonitoringError::Serialization(e.to_string()))
    }
}

/// Publishes scrape jobs for the local unit and, on the leader, the cluster
#[derive(Debug, Clone)]
pub struct PrometheusPublisher {
    relation: String,
}

impl Default for PrometheusPublisher {
    fn default() -> Self {
        Self {
            relation: PROMETHEUS_RELATION.into(),
        }
    }
}

impl PrometheusPublisher {
    pub fn is_related(&self, dir: &dyn PeerDirectory) -> bool {
        dir.has_relation(&self.relation)
    }

    /// Register the jobs. `ca_cert` is the CA chain of the endpoint, if any.
    pub fn publish(
        &self,
        dir: &mut dyn PeerDirectory,
        token: Option<&LeaderToken>,
        endpoint: &str,
        port: u16,
        metrics_path: &str,
        ca_cert: Option<&str>,
    ) -> Result<Vec<ScrapeJob>, MonitoringError> {
        if !self.is_related(dir) {
            return Ok(Vec::new());
        }
        let secure = ca_cert.is_some();
        let mut jobs = Vec::new();

        if let Some(token) = token {
            let app = dir.local_unit().app_name().to_string();
            let job = ScrapeJob::cluster(&app, endpoint, port, metrics_path, secure);
            dir.set_app_data(token, &self.relation, &job.request_key(), &job.encode()?)?;
            if let Some(ca) = ca_cert {
                dir.set_app_data(token, &self.relation, CA_CERT_KEY, ca)?;
            }
            jobs.push(job);
        }

        let unit = dir.local_unit().clone();
        let job = ScrapeJob::node(&unit, endpoint, port, metrics_path, secure);
        dir.set_unit_data(&self.relation, &job.request_key(), &job.encode()?)?;
        if let Some(ca) = ca_cert {
            dir.set_unit_data(&self.relation, CA_CERT_KEY, ca)?;
        }
        jobs.push(job);

        info!(jobs = jobs.len(), "Registered Prometheus scrape jobs");
        Ok(jobs)
    }
}

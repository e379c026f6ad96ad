// convergence/context.rs - Configuration Context

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ConvergenceError;

/// Environment file consumed by the Minio service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvFile {
    /// Volumes in bootstrap order
    pub volumes: Vec<String>,

    /// Extra server arguments (`--address :<port>`)
    pub opts: String,

    pub root_user: String,
    pub root_password: String,

    /// Serve metrics without authentication, set while Prometheus is related
    pub prometheus_public: bool,
}

impl EnvFile {
    /// Render as `KEY="value"` lines
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("MINIO_VOLUMES=\"{}\"\n", self.volumes.join(" ")));
        out.push_str(&format!("MINIO_OPTS=\"{}\"\n", self.opts));
        out.push_str(&format!("MINIO_ROOT_USER=\"{}\"\n", self.root_user));
        out.push_str(&format!("MINIO_ROOT_PASSWORD=\"{}\"\n", self.root_password));
        if self.prometheus_public {
            out.push_str("MINIO_PROMETHEUS_AUTH_TYPE=\"public\"\n");
        }
        out
    }
}

/// Parameters of the systemd unit running Minio
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub user: String,
    pub group: String,
}

impl ServiceUnit {
    pub fn render(&self, env_file: &str) -> String {
        format!(
            "[Unit]\n\
             Description=MinIO\n\
             Documentation=https://docs.min.io\n\
             Wants=network-online.target\n\
             After=network-online.target\n\
             AssertFileIsExecutable=/usr/local/bin/minio\n\
             \n\
             [Service]\n\
             WorkingDirectory=/usr/local\n\
             User={user}\n\
             Group={group}\n\
             ProtectProc=invisible\n\
             EnvironmentFile={env_file}\n\
             ExecStartPre=/bin/bash -c \"if [ -z \\\"${{MINIO_VOLUMES}}\\\" ]; then echo \\\"Variable MINIO_VOLUMES not set in {env_file}\\\"; exit 1; fi\"\n\
             ExecStart=/usr/local/bin/minio server $MINIO_OPTS $MINIO_VOLUMES\n\
             Restart=always\n\
             LimitNOFILE=1048576\n\
             TasksMax=infinity\n\
             TimeoutStopSec=infinity\n\
             SendSIGKILL=no\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            user = self.user,
            group = self.group,
            env_file = env_file,
        )
    }
}

/// Certificate material as applied; both fields empty when TLS is off
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertData {
    pub cert: String,
    pub key: String,
}

impl CertData {
    pub fn is_empty(&self) -> bool {
        self.cert.is_empty() && self.key.is_empty()
    }
}

/// Everything a running Minio depends on. Two contexts are equal when
/// their canonical serializations are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigContext {
    pub env: EnvFile,
    pub service: ServiceUnit,
    pub certs: CertData,
}

impl ConfigContext {
    /// Stable serialization used for diffing. Field order is declaration
    /// order, so equal contexts always produce equal strings.
    pub fn canonical(&self) -> Result<String, ConvergenceError> {
        serde_json::to_string(self).map_err(|e| ConvergenceError::Serialization(e.to_string()))
    }

    /// Short hex digest of the canonical form, safe to log
    pub fn fingerprint(&self) -> Result<String, ConvergenceError> {
        let canonical = self.canonical()?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(hex::encode(&digest[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ConfigContext {
        ConfigContext {
            env: EnvFile {
                volumes: vec!["http://a:9000/data1".into(), "http://b:9000/data1".into()],
                opts: "--address :9000".into(),
                root_user: "minio".into(),
                root_password: "testtest".into(),
                prometheus_public: false,
            },
            service: ServiceUnit {
                user: "minio".into(),
                group: "minio".into(),
            },
            certs: CertData::default(),
        }
    }

    #[test]
    fn test_env_file_render() {
        let mut ctx = context();
        let rendered = ctx.env.render();
        assert!(rendered.contains("MINIO_VOLUMES=\"http://a:9000/data1 http://b:9000/data1\"\n"));
        assert!(rendered.contains("MINIO_OPTS=\"--address :9000\"\n"));
        assert!(!rendered.contains("MINIO_PROMETHEUS_AUTH_TYPE"));

        ctx.env.prometheus_public = true;
        assert!(ctx.env.render().contains("MINIO_PROMETHEUS_AUTH_TYPE=\"public\""));
    }

    #[test]
    fn test_service_unit_render() {
        let unit = context().service.render("/etc/default/minio");
        assert!(unit.contains("User=minio\n"));
        assert!(unit.contains("EnvironmentFile=/etc/default/minio\n"));
        assert!(unit.contains("${MINIO_VOLUMES}"));
    }

    #[test]
    fn test_canonical_is_stable() {
        assert_eq!(context().canonical().unwrap(), context().canonical().unwrap());
        assert_eq!(context().fingerprint().unwrap().len(), 16);
    }

    #[test]
    fn test_volume_reordering_changes_canonical() {
        let mut reordered = context();
        reordered.env.volumes.reverse();
        assert_ne!(context().canonical().unwrap(), reordered.canonical().unwrap());
        assert_ne!(context().fingerprint().unwrap(), reordered.fingerprint().unwrap());
    }
}

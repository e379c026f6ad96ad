// settings/mod.rs - Operator Settings

//! Operator-facing configuration of the agent.
//!
//! Settings are layered with the `config` crate:
//!
//! 1. Built-in defaults ([`Settings::default`])
//! 2. An optional file (TOML, YAML or JSON, picked by extension)
//! 3. `MINIO_AGENT_*` environment variables, e.g. `MINIO_AGENT_MIN_UNITS=4`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "MINIO_AGENT";

/// Settings errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Operator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// URL of the Minio .deb package
    pub package: String,

    /// Install a changed package right away instead of waiting for the
    /// upgrade action
    pub automatic_upgrade: bool,

    pub user: String,
    pub group: String,

    /// Units required before the cluster is configured
    pub min_units: u32,

    /// Disks required across the cluster before it is configured
    pub min_disks: u32,

    pub minio_service_port: u16,

    pub minio_root_user: String,

    /// Extra name clients reach the service under, added to certificate SANs
    pub service_url: String,

    /// Virtual IP in front of the service, added to certificate SANs
    pub service_vip: String,

    /// Base64 encoded PEM certificate (leaf first, then chain)
    pub ssl_cert: String,

    /// Base64 encoded PEM private key
    pub ssl_key: String,

    pub prometheus_port: u16,
    pub prometheus_metrics_path: String,

    /// Run a heal against the cluster endpoint while peers are missing
    pub auto_heal: bool,

    /// `mc` alias the heal command runs against
    pub heal_alias: String,

    /// Namespace advertised to object-storage consumers
    pub namespace: String,

    /// Prefix for every file the agent renders
    pub root_dir: PathBuf,

    /// Hostname override, otherwise taken from the environment
    pub hostname: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            package: String::new(),
            automatic_upgrade: false,
            user: "minio".into(),
            group: "minio".into(),
            min_units: 1,
            min_disks: 4,
            minio_service_port: 9000,
            minio_root_user: "minio".into(),
            service_url: String::new(),
            service_vip: String::new(),
            ssl_cert: String::new(),
            ssl_key: String::new(),
            prometheus_port: 9000,
            prometheus_metrics_path: "/minio/v2/metrics/".into(),
            auto_heal: false,
            heal_alias: "minio".into(),
            namespace: String::new(),
            root_dir: PathBuf::from("/"),
            hostname: None,
        }
    }
}

impl Settings {
    /// Load settings from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            debug!("Loading settings from {:?}", path);
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the agent cannot work with
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.min_units == 0 {
            return Err(SettingsError::Invalid {
                key: "min_units",
                reason: "at least one unit is required".into(),
            });
        }
        if self.minio_service_port == 0 {
            return Err(SettingsError::Invalid {
                key: "minio_service_port",
                reason: "port must be non-zero".into(),
            });
        }
        if self.user.trim().is_empty() {
            return Err(SettingsError::Invalid {
                key: "user",
                reason: "must not be empty".into(),
            });
        }
        if self.group.trim().is_empty() {
            return Err(SettingsError::Invalid {
                key: "group",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Whether a multi-unit cluster is expected
    pub fn is_clustered(&self) -> bool {
        self.min_units > 1
    }

    /// Home of the service user, below `root_dir`
    pub fn user_home(&self) -> PathBuf {
        self.root_dir.join("home").join(&self.user)
    }

    /// Resolve an absolute system path below `root_dir`
    pub fn rooted(&self, path: &str) -> PathBuf {
        self.root_dir.join(path.trim_start_matches('/'))
    }
}

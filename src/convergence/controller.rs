// convergence/controller.rs - Convergence Controller

use tracing::debug;

use super::context::{CertData, ConfigContext, EnvFile, ServiceUnit};
use super::ConvergenceError;
use crate::cluster::VolumeSet;
use crate::settings::Settings;
use crate::store::EMPTY_CONTEXT;
use crate::tls::CertificateMaterial;

/// Inputs gathered by one evaluation
#[derive(Debug, Clone)]
pub struct ContextInputs<'a> {
    pub settings: &'a Settings,
    pub volumes: &'a VolumeSet,
    pub root_password: &'a str,
    pub prometheus_related: bool,
    pub tls: Option<&'a CertificateMaterial>,
}

/// Builds configuration contexts and decides whether they need a restart
#[derive(Debug, Clone)]
pub struct ConvergenceController {
    last_applied: String,
}

impl Default for ConvergenceController {
    fn default() -> Self {
        Self::new(EMPTY_CONTEXT)
    }
}

impl ConvergenceController {
    /// Start from the canonical form of the last applied context
    pub fn new(last_applied: impl Into<String>) -> Self {
        Self {
            last_applied: last_applied.into(),
        }
    }

    pub fn last_applied(&self) -> &str {
        &self.last_applied
    }

    /// Nothing was ever applied on this unit
    pub fn is_bootstrap(&self) -> bool {
        self.last_applied == EMPTY_CONTEXT
    }

    /// Derive the full context. Pure: no file is touched.
    pub fn build_context(&self, inputs: &ContextInputs<'_>) -> ConfigContext {
        let settings = inputs.settings;
        ConfigContext {
            env: EnvFile {
                volumes: inputs.volumes.volumes().to_vec(),
                opts: format!("--address :{}", settings.minio_service_port),
                root_user: settings.minio_root_user.clone(),
                root_password: inputs.root_password.to_string(),
                prometheus_public: inputs.prometheus_related,
            },
            service: ServiceUnit {
                user: settings.user.clone(),
                group: settings.group.clone(),
            },
            certs: inputs
                .tls
                .map(|m| CertData {
                    cert: m.cert.clone(),
                    key: m.key.clone(),
                })
                .unwrap_or_default(),
        }
    }

    /// Whether applying `context` differs from what is running
    pub fn needs_restart(&self, context: &ConfigContext) -> Result<bool, ConvergenceError> {
        let canonical = context.canonical()?;
        let differs = canonical != self.last_applied;
        debug!(differs, "Compared context with last applied");
        Ok(differs)
    }

    /// Record `context` as applied. Call only after a successful restart.
    pub fn commit(&mut self, context: &ConfigContext) -> Result<&str, ConvergenceError> {
        self.last_applied = context.canonical()?;
        Ok(&self.last_applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(controller: &ConvergenceController, volumes: &VolumeSet) -> ConfigContext {
        let settings = Settings::default();
        controller.build_context(&ContextInputs {
            settings: &settings,
            volumes,
            root_password: "testtest",
            prometheus_related: false,
            tls: None,
        })
    }

    #[test]
    fn test_first_context_needs_restart() {
        let controller = ConvergenceController::default();
        assert!(controller.is_bootstrap());

        let ctx = build(&controller, &VolumeSet::standalone(&["/data1".into()]));
        assert!(controller.needs_restart(&ctx).unwrap());
    }

    #[test]
    fn test_committed_context_is_noop() {
        let mut controller = ConvergenceController::default();
        let volumes = VolumeSet::standalone(&["/data1".into(), "/data2".into()]);
        let ctx = build(&controller, &volumes);

        controller.commit(&ctx).unwrap();
        assert!(!controller.is_bootstrap());
        assert!(!controller.needs_restart(&build(&controller, &volumes)).unwrap());
    }

    #[test]
    fn test_field_change_needs_restart() {
        let mut controller = ConvergenceController::default();
        let volumes = VolumeSet::standalone(&["/data1".into(), "/data2".into()]);
        let ctx = build(&controller, &volumes);
        controller.commit(&ctx).unwrap();

        let reordered = VolumeSet::standalone(&["/data2".into(), "/data1".into()]);
        assert!(controller.needs_restart(&build(&controller, &reordered)).unwrap());

        let mut with_tls = ctx.clone();
        with_tls.certs.cert = "CERT".into();
        assert!(controller.needs_restart(&with_tls).unwrap());
    }

    #[test]
    fn test_context_carries_settings() {
        let controller = ConvergenceController::default();
        let settings = Settings {
            minio_service_port: 9443,
            user: "test".into(),
            ..Default::default()
        };
        let material = CertificateMaterial {
            cert: "CERT".into(),
            key: "KEY".into(),
        };
        let volumes = VolumeSet::default();
        let ctx = controller.build_context(&ContextInputs {
            settings: &settings,
            volumes: &volumes,
            root_password: "pwd",
            prometheus_related: true,
            tls: Some(&material),
        });

        assert_eq!(ctx.env.opts, "--address :9443");
        assert_eq!(ctx.service.user, "test");
        assert_eq!(ctx.certs.key, "KEY");
        assert!(ctx.env.prometheus_public);
    }
}

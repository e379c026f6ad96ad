// convergence/render.rs - Artifact Rendering

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::context::ConfigContext;
use super::ConvergenceError;
use crate::settings::Settings;
use crate::tls::ca_chain;

pub const ENV_FILE: &str = "/etc/default/minio";
pub const SERVICE_FILE: &str = "/etc/systemd/system/minio.service";

const ENV_FILE_MODE: u32 = 0o600;
const SERVICE_FILE_MODE: u32 = 0o644;
const CERT_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;

/// Where rendered files land
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub env_file: PathBuf,
    pub service_file: PathBuf,
    /// Minio looks for `public.crt`, `private.key` and `CAs/` here
    pub certs_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn for_settings(settings: &Settings) -> Self {
        Self {
            env_file: settings.rooted(ENV_FILE),
            service_file: settings.rooted(SERVICE_FILE),
            certs_dir: settings.user_home().join(".minio").join("certs"),
        }
    }

    pub fn public_cert(&self) -> PathBuf {
        self.certs_dir.join("public.crt")
    }

    pub fn private_key(&self) -> PathBuf {
        self.certs_dir.join("private.key")
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.certs_dir.join("CAs").join("ca.crt")
    }
}

/// Writes a context to disk
#[derive(Debug, Clone)]
pub struct ArtifactRenderer {
    paths: ArtifactPaths,
}

impl ArtifactRenderer {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Render every artifact of the context
    pub fn render(&self, context: &ConfigContext) -> Result<(), ConvergenceError> {
        write_file(&self.paths.env_file, &context.env.render(), ENV_FILE_MODE)?;

        // The unit file always references the real location of the env file
        let unit = context.service.render(ENV_FILE);
        write_file(&self.paths.service_file, &unit, SERVICE_FILE_MODE)?;

        if context.certs.is_empty() {
            debug!("No certificate material, skipping TLS files");
        } else {
            write_file(&self.paths.public_cert(), &context.certs.cert, CERT_MODE)?;
            write_file(&self.paths.private_key(), &context.certs.key, KEY_MODE)?;
            let ca = ca_chain(&context.certs.cert);
            if !ca.is_empty() {
                write_file(&self.paths.ca_cert(), &ca, CERT_MODE)?;
            }
        }

        info!(env_file = ?self.paths.env_file, "Rendered Minio configuration");
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str, mode: u32) -> Result<(), ConvergenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    debug!(?path, "Wrote file with mode {:o}", mode);
    Ok(())
}

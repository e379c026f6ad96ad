// install/mod.rs - Package Installation and Host Provisioning

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::command::{args, CommandError, CommandRunner};
use crate::settings::Settings;

/// Where the downloaded package is staged
pub const PACKAGE_STAGING: &str = "/tmp/minio.deb";

/// `useradd`/`groupadd` exit status when the entry already exists
const ALREADY_EXISTS: i32 = 9;

/// Install errors
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("No package configured")]
    NoPackage,

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Installs Minio and prepares the host for it
#[derive(Clone)]
pub struct Installer {
    runner: Arc<dyn CommandRunner>,
}

impl Installer {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Folders the service needs, below the settings' root
    pub fn folders(settings: &Settings) -> Vec<PathBuf> {
        let certs = settings.user_home().join(".minio").join("certs");
        vec![
            settings.rooted("/etc/minio"),
            settings.user_home(),
            settings.user_home().join(".minio"),
            certs.clone(),
            certs.join("CAs"),
            settings.rooted("/var/log/minio"),
        ]
    }

    /// Create the service account and its folders. Existing accounts are
    /// kept as they are.
    pub fn provision(&self, settings: &Settings) -> Result<(), InstallError> {
        let folders = Self::folders(settings);
        for folder in &folders {
            std::fs::create_dir_all(folder)?;
        }

        tolerate_existing(
            self.runner
                .run("groupadd", &args(&["--system", &settings.group])),
            "group",
            &settings.group,
        )?;
        tolerate_existing(
            self.runner.run(
                "useradd",
                &args(&["--system", "--gid", &settings.group, &settings.user]),
            ),
            "user",
            &settings.user,
        )?;

        let owner = format!("{}:{}", settings.user, settings.group);
        let mut chown = vec!["-R".to_string(), owner];
        chown.extend(folders.iter().map(|f| f.display().to_string()));
        self.runner.run("chown", &chown)?;

        info!(user = %settings.user, group = %settings.group, "Provisioned service account");
        Ok(())
    }

    /// Download and install `package`. Returns the package reference to
    /// record as installed; a failure leaves the caller's record untouched.
    pub fn install_or_upgrade(&self, package: &str) -> Result<String, InstallError> {
        if package.is_empty() {
            return Err(InstallError::NoPackage);
        }

        self.runner.run("apt-get", &args(&["update"]))?;
        let result = self
            .runner
            .run("wget", &args(&[package, "-O", PACKAGE_STAGING]))
            .and_then(|_| self.runner.run("dpkg", &args(&["-i", PACKAGE_STAGING])));

        match result {
            Ok(_) => {
                info!(package, "Installed Minio package");
                Ok(package.to_string())
            }
            Err(e) => {
                error!(package, "Installation of minio package failed: {}", e);
                Err(e.into())
            }
        }
    }
}

fn tolerate_existing(
    result: Result<String, CommandError>,
    kind: &str,
    name: &str,
) -> Result<(), CommandError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.exit_code() == Some(ALREADY_EXISTS) => {
            warn!("{} {} already exists", kind, name);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DryRunRunner;

    fn sandbox() -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            root_dir: dir.path().to_path_buf(),
            user: "test".into(),
            group: "test".into(),
            ..Default::default()
        };
        (dir, settings)
    }

    #[test]
    fn test_install_commands() {
        let runner = DryRunRunner::new();
        let installer = Installer::new(Arc::new(runner.clone()));

        let installed = installer.install_or_upgrade("test").unwrap();
        assert_eq!(installed, "test");
        assert_eq!(
            runner.invocations(),
            vec![
                "apt-get update",
                "wget test -O /tmp/minio.deb",
                "dpkg -i /tmp/minio.deb",
            ]
        );
    }

    #[test]
    fn test_failed_install_reports_error() {
        let runner = DryRunRunner::new();
        runner.fail_on("dpkg", 1);
        let installer = Installer::new(Arc::new(runner));

        assert!(matches!(
            installer.install_or_upgrade("http://mirror.test/minio.deb"),
            Err(InstallError::Command(_))
        ));
        assert!(matches!(
            installer.install_or_upgrade(""),
            Err(InstallError::NoPackage)
        ));
    }

    #[test]
    fn test_provision_tolerates_existing_accounts() {
        let (_guard, settings) = sandbox();
        let runner = DryRunRunner::new();
        runner.fail_on("groupadd", 9);
        runner.fail_on("useradd", 9);
        let installer = Installer::new(Arc::new(runner.clone()));

        installer.provision(&settings).unwrap();
        for folder in Installer::folders(&settings) {
            assert!(folder.is_dir(), "{:?} missing", folder);
        }
        assert!(
            runner
                .invocations()
                .iter()
                .any(|c| c.starts_with("chown -R test:test"))
        );
    }

    #[test]
    fn test_provision_fails_on_other_errors() {
        let (_guard, settings) = sandbox();
        let runner = DryRunRunner::new();
        runner.fail_on("useradd", 1);
        let installer = Installer::new(Arc::new(runner));
        assert!(installer.provision(&settings).is_err());
    }
}

// command.rs - External Command Execution

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by external commands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{program} exited with {status:?}: {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
}

impl CommandError {
    /// Exit code of a command that ran, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { status, .. } => *status,
            CommandError::Spawn { .. } => None,
        }
    }
}

/// Runs programs on the host on behalf of the agent
pub trait CommandRunner: Send + Sync {
    /// Run to completion, returning stdout on a zero exit status
    fn run(&self, program: &str, args: &[String]) -> Result<String, CommandError>;
}

/// Build an argument vector from string slices
pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Runs commands for real
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String, CommandError> {
        debug!(program, ?args, "Running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| CommandError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(CommandError::Failed {
                program: program.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Records commands instead of running them.
///
/// Clones share the same log, so a test can hand one clone to the agent and
/// inspect the other. Failures are scripted by command-line prefix.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner {
    log: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<BTreeMap<String, i32>>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command line starting with `prefix` exit with `code`
    pub fn fail_on(&self, prefix: &str, code: i32) {
        self.failures.lock().insert(prefix.to_string(), code);
    }

    /// Stop failing commands starting with `prefix`
    pub fn succeed_on(&self, prefix: &str) {
        self.failures.lock().remove(prefix);
    }

    /// Every command line run so far, in order
    pub fn invocations(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl CommandRunner for DryRunRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String, CommandError> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        info!(command = %line, "dry-run");
        self.log.lock().push(line.clone());

        let failure = self
            .failures
            .lock()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, code)| *code);

        match failure {
            Some(code) => Err(CommandError::Failed {
                program: program.to_string(),
                status: Some(code),
                stderr: "scripted failure".into(),
            }),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_records_and_fails() {
        let runner = DryRunRunner::new();
        let observer = runner.clone();
        runner.fail_on("dpkg -i", 1);

        assert!(runner.run("apt-get", &args(&["update"])).is_ok());
        let err = runner
            .run("dpkg", &args(&["-i", "/tmp/minio.deb"]))
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));

        assert_eq!(
            observer.invocations(),
            vec!["apt-get update", "dpkg -i /tmp/minio.deb"]
        );
    }

    #[test]
    fn test_system_runner_reports_status() {
        let runner = SystemCommandRunner;
        assert!(runner.run("true", &[]).is_ok());
        assert!(matches!(
            runner.run("false", &[]),
            Err(CommandError::Failed { status: Some(1), .. })
        ));
        assert!(matches!(
            runner.run("/nonexistent/binary", &[]),
            Err(CommandError::Spawn { .. })
        ));
    }
}

// restart/service.rs - Service Management

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::command::{args, CommandError, CommandRunner};

/// Service errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Failed to restart {service}: {source}")]
    Restart {
        service: String,
        #[source]
        source: CommandError,
    },

    #[error("Failed to reload unit files: {0}")]
    Reload(#[source] CommandError),
}

/// Controls the services the agent is responsible for
pub trait ServiceManager {
    /// Pick up changed unit files
    fn reload(&self) -> Result<(), ServiceError>;

    fn restart(&self, service: &str) -> Result<(), ServiceError>;

    fn is_running(&self, service: &str) -> bool;
}

/// systemd through `systemctl`
#[derive(Clone)]
pub struct SystemdServices {
    runner: Arc<dyn CommandRunner>,
}

impl SystemdServices {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl ServiceManager for SystemdServices {
    fn reload(&self) -> Result<(), ServiceError> {
        self.runner
            .run("systemctl", &args(&["daemon-reload"]))
            .map(|_| ())
            .map_err(ServiceError::Reload)
    }

    fn restart(&self, service: &str) -> Result<(), ServiceError> {
        info!(service, "Restarting service");
        self.runner
            .run("systemctl", &args(&["restart", service]))
            .map(|_| ())
            .map_err(|source| ServiceError::Restart {
                service: service.to_string(),
                source,
            })
    }

    fn is_running(&self, service: &str) -> bool {
        let running = self
            .runner
            .run("systemctl", &args(&["is-active", "--quiet", service]))
            .is_ok();
        debug!(service, running, "Checked service");
        running
    }
}

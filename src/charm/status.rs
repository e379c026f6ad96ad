// charm/status.rs - Unit Status

use serde::{Deserialize, Serialize};
use std::fmt;

pub const SERVICE_RUNNING: &str = "Service is running";
pub const WAITING_FOR_PEERS: &str = "Waiting for peers";
pub const WAITING_FOR_CERTIFICATES: &str = "Waiting for certificates relation or option";
pub const WAITING_FOR_RESTART: &str = "Waiting for restart event";
pub const WAITING_FOR_UPGRADE: &str = "package config changed: waiting for upgrade action...";
pub const BUILDING_CONTEXT: &str = "Building context...";

/// Workload status reported by the unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Active(String),
    /// Needs operator or peer action
    Blocked(String),
    /// Work in progress that resolves itself
    Maintenance(String),
    Waiting(String),
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::Waiting("Waiting for install".into())
    }
}

impl UnitStatus {
    pub fn active(message: impl Into<String>) -> Self {
        UnitStatus::Active(message.into())
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        UnitStatus::Blocked(message.into())
    }

    pub fn maintenance(message: impl Into<String>) -> Self {
        UnitStatus::Maintenance(message.into())
    }

    pub fn waiting(message: impl Into<String>) -> Self {
        UnitStatus::Waiting(message.into())
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnitStatus::Active(_) => "active",
            UnitStatus::Blocked(_) => "blocked",
            UnitStatus::Maintenance(_) => "maintenance",
            UnitStatus::Waiting(_) => "waiting",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active(m)
            | UnitStatus::Blocked(m)
            | UnitStatus::Maintenance(m)
            | UnitStatus::Waiting(m) => m,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, UnitStatus::Active(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, UnitStatus::Blocked(_))
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            UnitStatus::blocked(WAITING_FOR_PEERS).to_string(),
            "blocked: Waiting for peers"
        );
        assert_eq!(UnitStatus::default().name(), "waiting");
        assert!(UnitStatus::active(SERVICE_RUNNING).is_active());
    }
}

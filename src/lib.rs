// lib.rs - Minio Deployment Agent
//
// Installs, configures and restarts Minio on machine units, coordinating
// bootstrap volumes and restarts with peer units over relation data.

#![doc = include_str!("../README.md")]

pub mod charm;
pub mod cluster;
pub mod command;
pub mod convergence;
pub mod install;
pub mod monitoring;
pub mod object_storage;
pub mod observability;
pub mod relation;
pub mod restart;
pub mod settings;
pub mod store;
pub mod tls;

// Re-export commonly used types
pub use charm::{AgentEnv, AgentError, Event, MinioCharm, UnitStatus};

pub use cluster::{
    ClusterError, ClusterManager, ClusterMembership, PeerLossTracker, Readiness, VolumeSet,
    VolumeSetResolver,
};

pub use relation::{LeaderToken, MemoryDirectory, PeerDirectory, RelationFabric, UnitId};

pub use restart::{RestartCoordinator, RestartLock, RestartOutcome, RestartPhase};

pub use settings::Settings;

pub use store::{AgentState, StateStore};

pub use observability::{
    init_metrics, init_tracing, MetricsConfig, MetricsHandle, TracingConfig, TracingFormat,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::charm::{AgentEnv, Event, MinioCharm, UnitStatus};
    pub use crate::command::{CommandRunner, DryRunRunner, SystemCommandRunner};
    pub use crate::relation::{MemoryDirectory, PeerDirectory, RelationFabric, UnitId};
    pub use crate::settings::Settings;
    pub use crate::store::{AgentState, StateStore};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

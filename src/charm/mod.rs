// charm/mod.rs - Minio Deployment Agent

//! Event dispatch for one Minio unit.
//!
//! Every incoming event runs one evaluation to completion:
//!
//! 1. Load the persisted [`AgentState`](crate::store::AgentState)
//! 2. Re-deliver deferred events, oldest first
//! 3. Handle the incoming event
//! 4. Save the state, including events that deferred again
//!
//! Every decision is re-derived from the current relation data, so
//! re-delivering an event later is always safe.

mod event;
mod minio;
mod status;

pub use event::{DeferredEvent, Event, EventError, EventQueue};
pub use minio::MinioCharm;
pub use status::{
    BUILDING_CONTEXT, SERVICE_RUNNING, UnitStatus, WAITING_FOR_CERTIFICATES, WAITING_FOR_PEERS,
    WAITING_FOR_RESTART, WAITING_FOR_UPGRADE,
};

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::command::CommandError;
use crate::convergence::ConvergenceError;
use crate::install::InstallError;
use crate::monitoring::MonitoringError;
use crate::relation::{DirectoryError, UnitId};
use crate::restart::{RestartError, ServiceError};
use crate::settings::SettingsError;
use crate::store::StoreError;
use crate::tls::TlsError;

/// Errors that abort an evaluation
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Relation error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Convergence error: {0}")]
    Convergence(#[from] ConvergenceError),

    #[error("Restart error: {0}")]
    Restart(#[from] RestartError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    #[error("Monitoring error: {0}")]
    Monitoring(#[from] MonitoringError),
}

/// Facts about the machine the unit runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEnv {
    pub unit: UnitId,
    /// Storage devices attached to the unit
    pub storage_count: usize,
    pub hostname: String,
    /// Address the service binds to and certificates are issued for
    pub binding_addr: String,
}

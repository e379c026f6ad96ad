// restart/mod.rs - Coordinated Service Restarts

//! Restarting Minio on several units at once takes the storage cluster
//! down, so restarts are serialized through a cluster-wide lock.
//!
//! # State machine
//!
//! ```text
//! Idle ──request──> PendingRestart ──lock acquired──> Locked ──> Restarting
//!                     ^    │                                      │      │
//!                     │    └──lock busy (deferred)                │      │
//!                     │                                  success  │      │ failure
//!                     │                                           v      v
//!                     └─────────────── retry ─────────────── Committed  Failed
//! ```
//!
//! The lock is released after every restart attempt, whatever its outcome.

mod coordinator;
mod lock;
mod service;

pub use coordinator::{
    RestartCoordinator, RestartOutcome, RestartPhase, RestartRequest, RestartStep,
};
pub use lock::{DirectoryRestartLock, LocalRestartLock, LockGuard, LockState, RestartLock};
pub use service::{ServiceError, ServiceManager, SystemdServices};

use thiserror::Error;

use crate::convergence::ConvergenceError;
use crate::relation::DirectoryError;

/// Restart errors
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("Invalid restart transition from {from} on {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Convergence error: {0}")]
    Convergence(#[from] ConvergenceError),

    #[error("Relation error: {0}")]
    Directory(#[from] DirectoryError),
}

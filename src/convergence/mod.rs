// convergence/mod.rs - Convergent Configuration

//! Desired-state configuration of the Minio service.
//!
//! Every evaluation rebuilds a [`ConfigContext`] from current inputs and
//! compares its canonical form with the last one that was applied by a
//! restart. Only a difference leads to a restart request.
//!
//! ```text
//! settings + volumes + TLS ──> build_context ──> needs_restart? ──> restart ──> commit
//!                                    │
//!                                    └──> ArtifactRenderer (env file, unit, certs)
//! ```

mod context;
mod controller;
mod render;

pub use context::{CertData, ConfigContext, EnvFile, ServiceUnit};
pub use controller::{ContextInputs, ConvergenceController};
pub use render::{ArtifactPaths, ArtifactRenderer, ENV_FILE, SERVICE_FILE};

use thiserror::Error;

/// Convergence errors
#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

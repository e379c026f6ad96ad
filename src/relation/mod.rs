// relation/mod.rs - Relation Data Exchange

//! Key/value exchange between cooperating units.
//!
//! Every relation carries two scopes of data:
//!
//! - **Unit data**: written by the owning unit, readable by every peer
//! - **Application data**: written only by the elected leader
//!
//! The [`PeerDirectory`] trait is the only way the rest of the crate touches
//! relation data. Application-scoped writes require a [`LeaderToken`], which
//! can only be obtained by a unit that currently holds leadership.
//!
//! # Example
//!
//! ```ignore
//! use minio_agent::relation::{LeaderToken, MemoryDirectory, RelationFabric};
//!
//! let fabric = RelationFabric::new();
//! fabric.join("cluster", &"minio/0".into());
//! let mut dir = MemoryDirectory::new(fabric, "minio/0".into(), true);
//!
//! dir.set_unit_data("cluster", "num_disks", "2")?;
//! if let Some(token) = LeaderToken::acquire(&dir) {
//!     dir.set_app_data(&token, "cluster", "root_pwd", "secret")?;
//! }
//! ```

mod directory;
mod leader;
mod records;

pub use directory::{
    DirectoryError, MemoryDirectory, PeerDirectory, RelationData, RelationFabric,
    RelationSnapshot, RelationState, UnitId,
};
pub use leader::{ApplicationWriter, LeaderToken};
pub use records::{keys, ApplicationRecord, PeerRecord, LOCK_REQUESTED};

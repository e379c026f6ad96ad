// cluster/mod.rs - Minio Peer Cluster

//! Cluster membership, readiness and bootstrap volume resolution.
//!
//! Units exchange their disk counts, URLs and data folders on the `cluster`
//! peer relation. From that exchange every unit derives:
//!
//! - whether the cluster has reached quorum ([`ClusterMembership`])
//! - the ordered list of volumes Minio bootstraps from ([`VolumeSetResolver`])
//! - how many peers went missing without saying goodbye ([`PeerLossTracker`])

mod disks;
mod manager;
mod membership;
mod peer_loss;
mod volumes;

pub use disks::{DiskLayout, DiskMount, DISK_MOUNT_COUNT};
pub use manager::{ClusterManager, LocalFacts};
pub use membership::{ClusterMembership, NotReadyReason, Readiness};
pub use peer_loss::{PeerHealth, PeerLossState, PeerLossTracker};
pub use volumes::{volume_uri, VolumeSet, VolumeSetResolver, VolumeSource};

use crate::relation::DirectoryError;
use thiserror::Error;

/// Name of the peer relation shared by every Minio unit
pub const PEER_RELATION: &str = "cluster";

/// Minio erasure sets are built from groups of four drives
pub const DISK_GROUP_SIZE: u32 = 4;

/// Cluster errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("Minio Cluster has {0} disks, which is not divisible by 4")]
    DiskCountInvariantViolation(u32),

    #[error("Endpoint {0} is published by more than one unit")]
    DuplicateEndpoint(String),

    #[error("Relation error: {0}")]
    Directory(#[from] DirectoryError),
}

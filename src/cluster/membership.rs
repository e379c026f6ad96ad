// cluster/membership.rs - Cluster Readiness

use std::fmt;

use super::{ClusterError, DISK_GROUP_SIZE};
use crate::relation::{keys, PeerDirectory, PeerRecord};

/// Why the cluster cannot be configured yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReadyReason {
    /// The peer relation has not been established
    NoPeerRelation,

    /// Fewer units than `min_units` (the local unit included)
    WaitingForUnits { observed: usize, required: u32 },

    /// Peers that joined but have not published their disk count yet
    WaitingForPeerData { silent: usize },

    /// Fewer disks than `min_disks` across the cluster
    WaitingForDisks { observed: u32, required: u32 },
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReadyReason::NoPeerRelation => write!(f, "cluster relation not established"),
            NotReadyReason::WaitingForUnits { observed, required } => {
                write!(f, "{} of {} units present", observed, required)
            }
            NotReadyReason::WaitingForPeerData { silent } => {
                write!(f, "{} units have not published their disks yet", silent)
            }
            NotReadyReason::WaitingForDisks { observed, required } => {
                write!(f, "{} of {} disks present", observed, required)
            }
        }
    }
}

/// Outcome of a readiness evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { units: usize, total_disks: u32 },
    NotReady(NotReadyReason),
    /// Operator must change the deployment; retrying will not help
    InvariantViolation { total_disks: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    /// Collapse into the boolean contract, keeping the invariant as an error
    pub fn into_result(self) -> Result<bool, ClusterError> {
        match self {
            Readiness::Ready { .. } => Ok(true),
            Readiness::NotReady(_) => Ok(false),
            Readiness::InvariantViolation { total_disks } => {
                Err(ClusterError::DiskCountInvariantViolation(total_disks))
            }
        }
    }
}

/// Read-only view of cluster membership over a relation snapshot
pub struct ClusterMembership<'a> {
    dir: &'a dyn PeerDirectory,
    relation: &'a str,
    local_disks: u32,
}

impl<'a> ClusterMembership<'a> {
    pub fn new(dir: &'a dyn PeerDirectory, relation: &'a str, local_disks: u32) -> Self {
        Self {
            dir,
            relation,
            local_disks,
        }
    }

    /// Records of every remote unit, in unit order
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.dir
            .remote_units(self.relation)
            .into_iter()
            .map(|unit| {
                let data = self.dir.unit_data(self.relation, &unit);
                PeerRecord::from_relation_data(unit, &data)
            })
            .collect()
    }

    /// Units in the cluster, the local one included
    pub fn unit_count(&self) -> usize {
        self.dir.remote_units(self.relation).len() + 1
    }

    /// Remote units without a published disk count
    pub fn silent_peers(&self) -> usize {
        self.dir
            .remote_units(self.relation)
            .iter()
            .filter(|unit| {
                !self
                    .dir
                    .unit_data(self.relation, unit)
                    .contains_key(keys::NUM_DISKS)
            })
            .count()
    }

    /// Local disks plus every disk peers have published so far
    pub fn total_disks(&self) -> u32 {
        self.peers()
            .iter()
            .fold(self.local_disks, |acc, p| acc.saturating_add(p.num_disks))
    }

    /// Evaluate readiness against the configured thresholds.
    ///
    /// Quorum is checked first, then every peer must have reported its
    /// disks, so that units still joining do not turn a transient disk total
    /// into an operator error. The divisibility invariant comes before the
    /// disk threshold.
    pub fn readiness(&self, min_units: u32, min_disks: u32) -> Readiness {
        if !self.dir.has_relation(self.relation) {
            return Readiness::NotReady(NotReadyReason::NoPeerRelation);
        }

        let units = self.unit_count();
        if units < min_units as usize {
            return Readiness::NotReady(NotReadyReason::WaitingForUnits {
                observed: units,
                required: min_units,
            });
        }

        let silent = self.silent_peers();
        if silent > 0 {
            return Readiness::NotReady(NotReadyReason::WaitingForPeerData { silent });
        }

        let total_disks = self.total_disks();
        if total_disks % DISK_GROUP_SIZE != 0 {
            return Readiness::InvariantViolation { total_disks };
        }

        if total_disks < min_disks {
            return Readiness::NotReady(NotReadyReason::WaitingForDisks {
                observed: total_disks,
                required: min_disks,
            });
        }

        Readiness::Ready { units, total_disks }
    }

    pub fn is_ready(&self, min_units: u32, min_disks: u32) -> Result<bool, ClusterError> {
        self.readiness(min_units, min_disks).into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{MemoryDirectory, RelationFabric, UnitId};
    use proptest::prelude::*;

    fn cluster(peer_disks: &[u32]) -> MemoryDirectory {
        let fabric = RelationFabric::new();
        fabric.join("cluster", &"minio/0".into());
        for (i, disks) in peer_disks.iter().enumerate() {
            let unit = UnitId::new(format!("minio/{}", i + 1));
            let disks = disks.to_string();
            fabric.update_unit_data("cluster", &unit, &[("num_disks", disks.as_str())]);
        }
        MemoryDirectory::new(fabric, "minio/0".into(), false)
    }

    #[test]
    fn test_four_units_two_disks_each_ready() {
        let dir = cluster(&[2, 2, 2]);
        let membership = ClusterMembership::new(&dir, "cluster", 2);

        assert_eq!(membership.total_disks(), 8);
        assert_eq!(
            membership.readiness(4, 8),
            Readiness::Ready {
                units: 4,
                total_disks: 8
            }
        );
        assert_eq!(membership.is_ready(4, 8), Ok(true));
    }

    #[test]
    fn test_three_units_below_quorum() {
        let dir = cluster(&[2, 2]);
        let membership = ClusterMembership::new(&dir, "cluster", 2);

        assert_eq!(
            membership.readiness(4, 8),
            Readiness::NotReady(NotReadyReason::WaitingForUnits {
                observed: 3,
                required: 4
            })
        );
        assert_eq!(membership.is_ready(4, 8), Ok(false));
    }

    #[test]
    fn test_no_relation_never_ready() {
        let dir = MemoryDirectory::new(RelationFabric::new(), "minio/0".into(), true);
        let membership = ClusterMembership::new(&dir, "cluster", 4);
        assert_eq!(
            membership.readiness(1, 0),
            Readiness::NotReady(NotReadyReason::NoPeerRelation)
        );
    }

    #[test]
    fn test_indivisible_disk_count_is_an_error() {
        let dir = cluster(&[2, 2, 3]);
        let membership = ClusterMembership::new(&dir, "cluster", 2);

        assert_eq!(
            membership.is_ready(4, 8),
            Err(ClusterError::DiskCountInvariantViolation(9))
        );
    }

    #[test]
    fn test_invariant_reported_before_disk_threshold() {
        let dir = cluster(&[1, 1, 1]);
        let membership = ClusterMembership::new(&dir, "cluster", 2);
        assert_eq!(
            membership.readiness(4, 64),
            Readiness::InvariantViolation { total_disks: 5 }
        );
    }

    #[test]
    fn test_silent_peer_is_not_an_invariant_violation() {
        let dir = cluster(&[2, 2]);
        dir.fabric().join("cluster", &"minio/3".into());
        let membership = ClusterMembership::new(&dir, "cluster", 2);
        assert_eq!(
            membership.readiness(4, 8),
            Readiness::NotReady(NotReadyReason::WaitingForPeerData { silent: 1 })
        );
    }

    #[test]
    fn test_waiting_for_disks() {
        let dir = cluster(&[0, 0, 0]);
        let membership = ClusterMembership::new(&dir, "cluster", 4);
        assert_eq!(
            membership.readiness(4, 8),
            Readiness::NotReady(NotReadyReason::WaitingForDisks {
                observed: 4,
                required: 8
            })
        );
    }

    #[test]
    fn test_readiness_is_idempotent() {
        let dir = cluster(&[2, 2, 2]);
        let membership = ClusterMembership::new(&dir, "cluster", 2);
        assert_eq!(membership.readiness(4, 8), membership.readiness(4, 8));
    }

    proptest! {
        #[test]
        fn prop_ready_when_divisible_and_thresholds_met(
            groups in proptest::collection::vec(1u32..4, 1..8),
            local_groups in 0u32..3,
        ) {
            let peer_disks: Vec<u32> = groups.iter().map(|g| g * 4).collect();
            let dir = cluster(&peer_disks);
            let local = local_groups * 4;
            let membership = ClusterMembership::new(&dir, "cluster", local);

            let units = (peer_disks.len() + 1) as u32;
            let total = local + peer_disks.iter().sum::<u32>();
            prop_assert_eq!(membership.is_ready(units, total), Ok(true));
        }

        #[test]
        fn prop_breaking_divisibility_raises(
            groups in proptest::collection::vec(1u32..4, 1..8),
            victim in 0usize..8,
            delta in 1u32..4,
        ) {
            let mut peer_disks: Vec<u32> = groups.iter().map(|g| g * 4).collect();
            let idx = victim % peer_disks.len();
            peer_disks[idx] += delta;
            let dir = cluster(&peer_disks);
            let membership = ClusterMembership::new(&dir, "cluster", 0);

            let units = (peer_disks.len() + 1) as u32;
            let total: u32 = peer_disks.iter().sum();
            prop_assert_eq!(
                membership.is_ready(units, 0),
                Err(ClusterError::DiskCountInvariantViolation(total))
            );
        }
    }
}

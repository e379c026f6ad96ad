// cluster/peer_loss.rs - Ungraceful Departure Tracking

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::ClusterError;
use crate::relation::{
    keys, ApplicationRecord, ApplicationWriter, LeaderToken, PeerDirectory, PeerRecord, UnitId,
};

/// Per-unit bookkeeping, persisted between evaluations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLossState {
    /// Peers seen on the relation, with their last `departing` flag
    pub known_peers: BTreeMap<UnitId, bool>,

    /// Units whose re-establishment ack the leader already counted
    pub counted_acks: BTreeSet<UnitId>,

    /// Whether the local unit is currently part of the relation
    pub joined: bool,

    /// The local unit joined while peers were missing and owes an ack
    pub ack_pending: bool,
}

/// Advisory cluster health derived from `peers_gone`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerHealth {
    Healthy,
    Degraded { peers_gone: i64 },
}

impl PeerHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PeerHealth::Degraded { .. })
    }
}

/// Counts peers that left without the departing handshake
#[derive(Debug, Clone)]
pub struct PeerLossTracker {
    relation: String,
}

impl PeerLossTracker {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
        }
    }

    /// Current counter, never negative
    pub fn peers_gone(&self, dir: &dyn PeerDirectory) -> i64 {
        ApplicationRecord::from_relation_data(&dir.app_data(&self.relation))
            .peers_gone
            .max(0)
    }

    pub fn health(&self, dir: &dyn PeerDirectory) -> PeerHealth {
        match self.peers_gone(dir) {
            0 => PeerHealth::Healthy,
            peers_gone => PeerHealth::Degraded { peers_gone },
        }
    }

    /// Remember which peers are present and whether they announced leaving
    pub fn observe(&self, state: &mut PeerLossState, peers: &[PeerRecord]) {
        for peer in peers {
            state.known_peers.insert(peer.unit.clone(), peer.departing);
        }
    }

    /// Handle a peer leaving the relation. Returns whether the departure was
    /// ungraceful. Only the leader updates the counter.
    pub fn on_departed(
        &self,
        dir: &mut dyn PeerDirectory,
        token: Option<&LeaderToken>,
        state: &mut PeerLossState,
        unit: &UnitId,
    ) -> Result<bool, ClusterError> {
        let graceful = state.known_peers.remove(unit).unwrap_or(false);
        state.counted_acks.remove(unit);

        if graceful {
            info!(unit = %unit, "Peer departed gracefully");
            return Ok(false);
        }

        warn!(unit = %unit, "Peer departed without handshake");
        if let Some(token) = token {
            let count = self.peers_gone(dir) + 1;
            ApplicationWriter::new(dir, token, &self.relation).set_peers_gone(count)?;
            info!(peers_gone = count, "Recorded lost peer");
        }
        Ok(true)
    }

    /// Leader side: decrement once for every unit newly acknowledging its
    /// return. Acks that were withdrawn are forgotten so the next recovery
    /// cycle counts again.
    pub fn reconcile_acks(
        &self,
        dir: &mut dyn PeerDirectory,
        token: &LeaderToken,
        state: &mut PeerLossState,
        records: &[PeerRecord],
    ) -> Result<(), ClusterError> {
        let acking: BTreeSet<UnitId> = records
            .iter()
            .filter(|r| r.ack_peer_restablished)
            .map(|r| r.unit.clone())
            .collect();

        state.counted_acks.retain(|u| acking.contains(u));

        let fresh: Vec<UnitId> = acking
            .into_iter()
            .filter(|u| !state.counted_acks.contains(u))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let before = self.peers_gone(dir);
        let after = (before - fresh.len() as i64).max(0);
        for unit in fresh {
            debug!(unit = %unit, "Counting peer re-establishment");
            state.counted_acks.insert(unit);
        }
        if after != before {
            ApplicationWriter::new(dir, token, &self.relation).set_peers_gone(after)?;
            info!(peers_gone = after, "Peer recovery acknowledged");
        }
        Ok(())
    }

    /// The local unit entered the relation. If peers are missing at that
    /// point the unit acknowledges the re-establishment, at most once per
    /// join. Returns whether an ack was published.
    pub fn on_joined(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut PeerLossState,
    ) -> Result<bool, ClusterError> {
        if !state.joined {
            state.joined = true;
            state.ack_pending = self.peers_gone(dir) > 0;
        }

        if !state.ack_pending {
            return Ok(false);
        }
        dir.set_unit_data(&self.relation, keys::ACK_PEER_RESTABLISHED, "true")?;
        state.ack_pending = false;
        info!("Acknowledged peer re-establishment");
        Ok(true)
    }

    /// Withdraw the local ack once the cluster is whole again
    pub fn clear_ack_if_healed(&self, dir: &mut dyn PeerDirectory) -> Result<(), ClusterError> {
        if self.peers_gone(dir) > 0 {
            return Ok(());
        }
        let local = dir.local_unit().clone();
        let data = dir.unit_data(&self.relation, &local);
        let own = PeerRecord::from_relation_data(local, &data);
        if own.ack_peer_restablished {
            dir.set_unit_data(&self.relation, keys::ACK_PEER_RESTABLISHED, "")?;
        }
        Ok(())
    }

    /// The local unit left the relation
    pub fn on_left(&self, state: &mut PeerLossState) {
        state.joined = false;
        state.ack_pending = false;
        state.known_peers.clear();
        state.counted_acks.clear();
    }
}

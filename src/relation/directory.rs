// relation/directory.rs - Peer Directory Abstraction

use derive_more::{Display, From};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::leader::LeaderToken;

/// Key/value pairs published by one unit or application on a relation
pub type RelationData = BTreeMap<String, String>;

/// Errors raised by relation data access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Relation not present: {0}")]
    UnknownRelation(String),

    #[error("Unit {0} is not the leader")]
    NotLeader(UnitId),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Stable identifier of a unit, formatted as `<application>/<number>`
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Application part of the identifier
    pub fn app_name(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Identifier usable in file and job names (`minio/0` -> `minio-0`)
    pub fn slug(&self) -> String {
        self.0.replace('/', "-")
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Data held by a single relation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationState {
    /// Unit-scoped data, keyed by unit
    #[serde(default)]
    pub units: BTreeMap<UnitId, RelationData>,

    /// Application-scoped data, keyed by application name
    #[serde(default)]
    pub apps: BTreeMap<String, RelationData>,
}

/// Point-in-time view of every relation known to a unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSnapshot {
    #[serde(default)]
    pub relations: BTreeMap<String, RelationState>,
}

/// Abstraction over the key/value exchange between units.
///
/// Reads of absent data return empty maps. Writing an empty value removes
/// the key.
pub trait PeerDirectory: Send + Sync {
    /// The unit evaluating events
    fn local_unit(&self) -> &UnitId;

    /// Whether the local unit currently holds leadership
    fn is_leader(&self) -> bool;

    /// Whether the relation has been established at all
    fn has_relation(&self, relation: &str) -> bool;

    /// Every unit on the relation except the local one, sorted
    fn remote_units(&self, relation: &str) -> Vec<UnitId>;

    /// Unit-scoped data of any unit on the relation (including the local one)
    fn unit_data(&self, relation: &str, unit: &UnitId) -> RelationData;

    /// Application-scoped data of the local application
    fn app_data(&self, relation: &str) -> RelationData;

    /// Application-scoped data of every other application on the relation
    fn remote_app_data(&self, relation: &str) -> Vec<(String, RelationData)>;

    /// Publish a key in the local unit's data
    fn set_unit_data(&mut self, relation: &str, key: &str, value: &str)
        -> Result<(), DirectoryError>;

    /// Publish a key in the local application's data
    fn set_app_data(
        &mut self,
        token: &LeaderToken,
        relation: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DirectoryError>;
}

/// Shared relation state for every unit attached to it.
///
/// Cloning a fabric yields another handle on the same state, which is how a
/// multi-unit cluster is simulated in-process.
#[derive(Debug, Clone, Default)]
pub struct RelationFabric {
    inner: Arc<RwLock<RelationSnapshot>>,
}

impl RelationFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RelationSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Load a snapshot file written by [`RelationFabric::save_json`]
    pub fn load_json(path: &Path) -> Result<Self, DirectoryError> {
        if !path.exists() {
            debug!("No relation snapshot at {:?}, starting empty", path);
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path).map_err(|e| DirectoryError::Io(e.to_string()))?;
        let snapshot: RelationSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| DirectoryError::Serialization(e.to_string()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save_json(&self, path: &Path) -> Result<(), DirectoryError> {
        let bytes = serde_json::to_vec_pretty(&*self.inner.read())
            .map_err(|e| DirectoryError::Serialization(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| DirectoryError::Io(e.to_string()))
    }

    pub fn snapshot(&self) -> RelationSnapshot {
        self.inner.read().clone()
    }

    /// Establish a relation with no members
    pub fn add_relation(&self, relation: &str) {
        self.inner
            .write()
            .relations
            .entry(relation.to_string())
            .or_default();
    }

    /// Tear a relation down entirely
    pub fn remove_relation(&self, relation: &str) {
        self.inner.write().relations.remove(relation);
    }

    /// Add a unit to a relation, creating the relation if needed
    pub fn join(&self, relation: &str, unit: &UnitId) {
        self.inner
            .write()
            .relations
            .entry(relation.to_string())
            .or_default()
            .units
            .entry(unit.clone())
            .or_default();
    }

    /// Remove a unit from a relation, returning its last published data
    pub fn depart(&self, relation: &str, unit: &UnitId) -> Option<RelationData> {
        self.inner
            .write()
            .relations
            .get_mut(relation)
            .and_then(|state| state.units.remove(unit))
    }

    /// Seed unit data directly, bypassing ownership rules
    pub fn update_unit_data(&self, relation: &str, unit: &UnitId, pairs: &[(&str, &str)]) {
        let mut guard = self.inner.write();
        let data = guard
            .relations
            .entry(relation.to_string())
            .or_default()
            .units
            .entry(unit.clone())
            .or_default();
        apply_pairs(data, pairs);
    }

    /// Seed application data directly, bypassing leadership rules
    pub fn update_app_data(&self, relation: &str, app: &str, pairs: &[(&str, &str)]) {
        let mut guard = self.inner.write();
        let data = guard
            .relations
            .entry(relation.to_string())
            .or_default()
            .apps
            .entry(app.to_string())
            .or_default();
        apply_pairs(data, pairs);
    }
}

fn apply_pairs(data: &mut RelationData, pairs: &[(&str, &str)]) {
    for (key, value) in pairs {
        if value.is_empty() {
            data.remove(*key);
        } else {
            data.insert(key.to_string(), value.to_string());
        }
    }
}

/// One unit's view on a [`RelationFabric`]
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    fabric: RelationFabric,
    unit: UnitId,
    leader: bool,
}

impl MemoryDirectory {
    pub fn new(fabric: RelationFabric, unit: UnitId, leader: bool) -> Self {
        Self {
            fabric,
            unit,
            leader,
        }
    }

    pub fn fabric(&self) -> &RelationFabric {
        &self.fabric
    }

    /// Leadership is decided outside the agent; this mirrors an election result
    pub fn set_leader(&mut self, leader: bool) {
        self.leader = leader;
    }
}

impl PeerDirectory for MemoryDirectory {
    fn local_unit(&self) -> &UnitId {
        &self.unit
    }

    fn is_leader(&self) -> bool {
        self.leader
    }

    fn has_relation(&self, relation: &str) -> bool {
        self.fabric.inner.read().relations.contains_key(relation)
    }

    fn remote_units(&self, relation: &str) -> Vec<UnitId> {
        self.fabric
            .inner
            .read()
            .relations
            .get(relation)
            .map(|state| {
                state
                    .units
                    .keys()
                    .filter(|u| **u != self.unit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn unit_data(&self, relation: &str, unit: &UnitId) -> RelationData {
        self.fabric
            .inner
            .read()
            .relations
            .get(relation)
            .and_then(|state| state.units.get(unit).cloned())
            .unwrap_or_default()
    }

    fn app_data(&self, relation: &str) -> RelationData {
        self.fabric
            .inner
            .read()
            .relations
            .get(relation)
            .and_then(|state| state.apps.get(self.unit.app_name()).cloned())
            .unwrap_or_default()
    }

    fn remote_app_data(&self, relation: &str) -> Vec<(String, RelationData)> {
        let local_app = self.unit.app_name();
        self.fabric
            .inner
            .read()
            .relations
            .get(relation)
            .map(|state| {
                state
                    .apps
                    .iter()
                    .filter(|(app, _)| app.as_str() != local_app)
                    .map(|(app, data)| (app.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_unit_data(
        &mut self,
        relation: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DirectoryError> {
        let mut guard = self.fabric.inner.write();
        let state = guard
            .relations
            .get_mut(relation)
            .ok_or_else(|| DirectoryError::UnknownRelation(relation.to_string()))?;
        let data = state.units.entry(self.unit.clone()).or_default();
        apply_pairs(data, &[(key, value)]);
        Ok(())
    }

    fn set_app_data(
        &mut self,
        token: &LeaderToken,
        relation: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DirectoryError> {
        if !self.leader || token.unit() != &self.unit {
            return Err(DirectoryError::NotLeader(self.unit.clone()));
        }
        let mut guard = self.fabric.inner.write();
        let state = guard
            .relations
            .get_mut(relation)
            .ok_or_else(|| DirectoryError::UnknownRelation(relation.to_string()))?;
        let data = state.apps.entry(self.unit.app_name().to_string()).or_default();
        apply_pairs(data, &[(key, value)]);
        Ok(())
    }
}

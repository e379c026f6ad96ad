// store/mod.rs - Persistent Unit State using Sled

//! Per-unit state that survives agent restarts.
//!
//! The whole [`AgentState`] is one bincode value in a sled tree. It is loaded
//! at the start of every evaluation and saved once the evaluation finished.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::charm::{DeferredEvent, UnitStatus};
use crate::cluster::{DiskLayout, PeerLossState};
use crate::restart::RestartRequest;

/// Length of a generated root password
pub const ROOT_PWD_LEN: usize = 32;

/// Canonical form of "nothing applied yet"
pub const EMPTY_CONTEXT: &str = "{}";

const TREE_STATE: &str = "agent_state";
const KEY_STATE: &[u8] = b"state";

/// Errors related to state persistence
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Everything a unit remembers between evaluations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Package reference that was last installed successfully
    pub package: String,

    /// Canonical serialization of the last context a restart applied
    pub last_applied_context: String,

    /// Root password: generated locally, replaced by the leader's once known
    pub minio_root_pwd: String,

    pub disks: DiskLayout,

    /// Last opened service port
    pub port: Option<u16>,

    /// A restart request is queued, mirrors `pending_restart`
    pub need_restart: bool,

    /// A new package was installed and only runs after a restart, even
    /// when the rendered configuration did not change
    pub upgrade_restart: bool,

    pub pending_restart: Option<RestartRequest>,

    /// Events waiting for re-delivery, oldest first
    pub deferred: Vec<DeferredEvent>,

    pub peer_loss: PeerLossState,

    /// The install event completed at least once
    pub installed: bool,

    pub status: UnitStatus,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            package: String::new(),
            last_applied_context: EMPTY_CONTEXT.into(),
            minio_root_pwd: generate_password(ROOT_PWD_LEN),
            disks: DiskLayout::default(),
            port: None,
            need_restart: false,
            upgrade_restart: false,
            pending_restart: None,
            deferred: Vec::new(),
            peer_loss: PeerLossState::default(),
            installed: false,
            status: UnitStatus::default(),
        }
    }
}

impl AgentState {
    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.minio_root_pwd = "********".into();
        if let Some(request) = copy.pending_restart.as_mut() {
            request.context.env.root_password = "********".into();
        }
        copy
    }
}

/// Random alphanumeric password
pub fn generate_password(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Persistent state store backed by sled
pub struct StateStore {
    db: Db,
    state: Tree,
}

impl StateStore {
    /// Open or create a state store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let state = db.open_tree(TREE_STATE)?;
        Ok(Self { db, state })
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        let state = db.open_tree(TREE_STATE)?;
        Ok(Self { db, state })
    }

    /// Load the unit state. The first load creates and persists defaults so
    /// the generated password stays stable.
    pub fn load(&self) -> Result<AgentState, StoreError> {
        match self.state.get(KEY_STATE)? {
            Some(bytes) => {
                let (state, _): (AgentState, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| StoreError::Serialization(e.to_string()))?;
                debug!("Loaded unit state");
                Ok(state)
            }
            None => {
                info!("No unit state found, initializing defaults");
                let state = AgentState::default();
                self.save(&state)?;
                Ok(state)
            }
        }
    }

    pub fn save(&self, state: &AgentState) -> Result<(), StoreError> {
        let bytes = bincode::serde::encode_to_vec(state, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.state.insert(KEY_STATE, bytes)?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_load_persists_defaults() {
        let store = StateStore::in_memory().unwrap();
        let first = store.load().unwrap();
        let second = store.load().unwrap();

        assert_eq!(first.minio_root_pwd.len(), ROOT_PWD_LEN);
        assert_eq!(first.minio_root_pwd, second.minio_root_pwd);
        assert_eq!(first.last_applied_context, EMPTY_CONTEXT);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");

        {
            let store = StateStore::open(&path).unwrap();
            let mut state = store.load().unwrap();
            state.package = "http://mirror.test/minio.deb".into();
            state.port = Some(9000);
            state.need_restart = true;
            state.upgrade_restart = true;
            store.save(&state).unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        let state = store.load().unwrap();
        assert_eq!(state.package, "http://mirror.test/minio.deb");
        assert_eq!(state.port, Some(9000));
        assert!(state.need_restart);
        assert!(state.upgrade_restart);
    }

    #[test]
    fn test_redacted_masks_password() {
        let state = AgentState::default();
        assert_ne!(state.redacted().minio_root_pwd, state.minio_root_pwd);
    }

    #[test]
    fn test_generated_passwords_differ() {
        assert_ne!(generate_password(16), generate_password(16));
    }
}

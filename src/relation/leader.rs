// relation/leader.rs - Leader Write Capability

use super::directory::{DirectoryError, PeerDirectory, UnitId};
use super::records::keys;

/// Proof that the local unit held leadership when the evaluation started.
///
/// The token cannot be built outside this module, so code paths that never
/// called [`LeaderToken::acquire`] have no way to write application data.
#[derive(Debug)]
pub struct LeaderToken {
    unit: UnitId,
}

impl LeaderToken {
    /// Obtain the token if the directory reports the local unit as leader
    pub fn acquire(dir: &dyn PeerDirectory) -> Option<Self> {
        if dir.is_leader() {
            Some(Self {
                unit: dir.local_unit().clone(),
            })
        } else {
            None
        }
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }
}

/// Typed writer for the cluster-wide application record
pub struct ApplicationWriter<'a> {
    dir: &'a mut dyn PeerDirectory,
    token: &'a LeaderToken,
    relation: &'a str,
}

impl<'a> ApplicationWriter<'a> {
    pub fn new(dir: &'a mut dyn PeerDirectory, token: &'a LeaderToken, relation: &'a str) -> Self {
        Self {
            dir,
            token,
            relation,
        }
    }

    pub fn set_root_pwd(&mut self, pwd: &str) -> Result<(), DirectoryError> {
        self.dir
            .set_app_data(self.token, self.relation, keys::ROOT_PWD, pwd)
    }

    pub fn set_minio_volumes(&mut self, volumes: &str) -> Result<(), DirectoryError> {
        self.dir
            .set_app_data(self.token, self.relation, keys::MINIO_VOLUMES, volumes)
    }

    pub fn set_peers_gone(&mut self, count: i64) -> Result<(), DirectoryError> {
        self.dir.set_app_data(
            self.token,
            self.relation,
            keys::PEERS_GONE,
            &count.max(0).to_string(),
        )
    }

    pub fn set_restart_lock_holder(&mut self, holder: Option<&UnitId>) -> Result<(), DirectoryError> {
        let value = holder.map(UnitId::as_str).unwrap_or("");
        self.dir
            .set_app_data(self.token, self.relation, keys::RESTART_LOCK_HOLDER, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{MemoryDirectory, RelationFabric};

    #[test]
    fn test_follower_cannot_acquire_token() {
        let dir = MemoryDirectory::new(RelationFabric::new(), "minio/1".into(), false);
        assert!(LeaderToken::acquire(&dir).is_none());
    }

    #[test]
    fn test_leader_writes_application_record() {
        let fabric = RelationFabric::new();
        fabric.join("cluster", &"minio/0".into());
        let mut dir = MemoryDirectory::new(fabric, "minio/0".into(), true);

        let token = LeaderToken::acquire(&dir).unwrap();
        ApplicationWriter::new(&mut dir, &token, "cluster")
            .set_root_pwd("testtest")
            .unwrap();

        let data = dir.app_data("cluster");
        assert_eq!(data.get(keys::ROOT_PWD).map(String::as_str), Some("testtest"));
    }

    #[test]
    fn test_stale_token_rejected_after_losing_leadership() {
        let fabric = RelationFabric::new();
        fabric.join("cluster", &"minio/0".into());
        let mut dir = MemoryDirectory::new(fabric, "minio/0".into(), true);
        let token = LeaderToken::acquire(&dir).unwrap();

        dir.set_leader(false);
        let err = ApplicationWriter::new(&mut dir, &token, "cluster")
            .set_peers_gone(1)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotLeader(_)));
    }

    #[test]
    fn test_peers_gone_never_written_negative() {
        let fabric = RelationFabric::new();
        fabric.join("cluster", &"minio/0".into());
        let mut dir = MemoryDirectory::new(fabric, "minio/0".into(), true);
        let token = LeaderToken::acquire(&dir).unwrap();

        ApplicationWriter::new(&mut dir, &token, "cluster")
            .set_peers_gone(-3)
            .unwrap();
        assert_eq!(
            dir.app_data("cluster").get(keys::PEERS_GONE).map(String::as_str),
            Some("0")
        );
    }
}

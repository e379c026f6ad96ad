// object_storage.rs - Object Storage Provider Relation

//! Hands the S3 endpoint and its credentials to consuming applications.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::relation::{DirectoryError, PeerDirectory};

pub const OBJECT_STORAGE_RELATION: &str = "object-storage";

/// Connection details published to every consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorageInfo {
    pub access_key: String,
    pub namespace: String,
    pub port: u16,
    pub secret_key: String,
    pub secure: bool,
    pub service: String,
}

impl ObjectStorageInfo {
    /// Wire pairs, in the key spelling consumers expect
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("access-key", self.access_key.clone()),
            ("namespace", self.namespace.clone()),
            ("port", self.port.to_string()),
            ("secret-key", self.secret_key.clone()),
            ("secure", self.secure.to_string()),
            ("service", self.service.clone()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStorageProvider {
    relation: String,
}

impl Default for ObjectStorageProvider {
    fn default() -> Self {
        Self {
            relation: OBJECT_STORAGE_RELATION.into(),
        }
    }
}

impl ObjectStorageProvider {
    pub fn is_related(&self, dir: &dyn PeerDirectory) -> bool {
        dir.has_relation(&self.relation)
    }

    /// Publish `info` in the local unit data. Returns false when there is
    /// no consumer to publish to.
    pub fn send_info(
        &self,
        dir: &mut dyn PeerDirectory,
        info: &ObjectStorageInfo,
    ) -> Result<bool, DirectoryError> {
        if !self.is_related(dir) {
            debug!("No {} consumers", self.relation);
            return Ok(false);
        }
        for (key, value) in info.to_pairs() {
            dir.set_unit_data(&self.relation, key, &value)?;
        }
        info!(service = %info.service, secure = info.secure, "Published object storage endpoint");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{MemoryDirectory, RelationFabric};

    fn info() -> ObjectStorageInfo {
        ObjectStorageInfo {
            access_key: "minio".into(),
            namespace: "backups".into(),
            port: 9000,
            secret_key: "testtest".into(),
            secure: true,
            service: "minio-0.test".into(),
        }
    }

    #[test]
    fn test_send_info_publishes_wire_keys() {
        let fabric = RelationFabric::new();
        fabric.join(OBJECT_STORAGE_RELATION, &"minio/0".into());
        fabric.join(OBJECT_STORAGE_RELATION, &"backup/0".into());
        let mut dir = MemoryDirectory::new(fabric.clone(), "minio/0".into(), false);

        assert!(ObjectStorageProvider::default().send_info(&mut dir, &info()).unwrap());

        // The consumer sees the provider's unit data
        let consumer = MemoryDirectory::new(fabric, "backup/0".into(), false);
        let data = consumer.unit_data(OBJECT_STORAGE_RELATION, &"minio/0".into());
        assert_eq!(data["access-key"], "minio");
        assert_eq!(data["secret-key"], "testtest");
        assert_eq!(data["port"], "9000");
        assert_eq!(data["secure"], "true");
        assert_eq!(data["service"], "minio-0.test");
        assert_eq!(data["namespace"], "backups");
    }

    #[test]
    fn test_send_info_without_consumers() {
        let mut dir = MemoryDirectory::new(RelationFabric::new(), "minio/0".into(), false);
        assert!(!ObjectStorageProvider::default().send_info(&mut dir, &info()).unwrap());
    }
}

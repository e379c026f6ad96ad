// cluster/manager.rs - Peer Relation Manager

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::membership::ClusterMembership;
use super::volumes::{VolumeSet, VolumeSetResolver, VolumeSource};
use super::ClusterError;
use crate::relation::{
    keys, ApplicationRecord, ApplicationWriter, LeaderToken, PeerDirectory, PeerRecord,
};

/// What the local unit knows about itself and publishes to its peers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFacts {
    pub num_disks: u32,
    pub url: String,
    pub used_folders: Vec<String>,
    pub sans: BTreeSet<String>,
}

/// Reads and writes the `cluster` peer relation on behalf of the local unit
#[derive(Debug, Clone)]
pub struct ClusterManager {
    relation: String,
}

impl ClusterManager {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn is_established(&self, dir: &dyn PeerDirectory) -> bool {
        dir.has_relation(&self.relation)
    }

    pub fn membership<'a>(
        &'a self,
        dir: &'a dyn PeerDirectory,
        local_disks: u32,
    ) -> ClusterMembership<'a> {
        ClusterMembership::new(dir, &self.relation, local_disks)
    }

    /// What the local unit has published so far
    pub fn local_record(&self, dir: &dyn PeerDirectory) -> PeerRecord {
        let unit = dir.local_unit().clone();
        let data = dir.unit_data(&self.relation, &unit);
        PeerRecord::from_relation_data(unit, &data)
    }

    /// Publish the local unit's facts. Handshake flags are left untouched.
    pub fn publish_local(
        &self,
        dir: &mut dyn PeerDirectory,
        facts: &LocalFacts,
    ) -> Result<(), ClusterError> {
        if !self.is_established(dir) {
            debug!("No {} relation yet, nothing to publish", self.relation);
            return Ok(());
        }

        let sans = facts.sans.iter().cloned().collect::<Vec<_>>().join(",");
        dir.set_unit_data(&self.relation, keys::NUM_DISKS, &facts.num_disks.to_string())?;
        dir.set_unit_data(&self.relation, keys::URL, &facts.url)?;
        dir.set_unit_data(
            &self.relation,
            keys::USED_FOLDERS,
            &facts.used_folders.join(","),
        )?;
        dir.set_unit_data(&self.relation, keys::SANS, &sans)?;
        Ok(())
    }

    /// Raise or clear a boolean flag in the local unit data
    pub fn set_flag(
        &self,
        dir: &mut dyn PeerDirectory,
        key: &str,
        value: bool,
    ) -> Result<(), ClusterError> {
        dir.set_unit_data(&self.relation, key, if value { "true" } else { "" })?;
        Ok(())
    }

    pub fn application_record(&self, dir: &dyn PeerDirectory) -> ApplicationRecord {
        ApplicationRecord::from_relation_data(&dir.app_data(&self.relation))
    }

    /// Root password shared by the leader, if published
    pub fn root_pwd(&self, dir: &dyn PeerDirectory) -> Option<String> {
        self.application_record(dir).root_pwd
    }

    /// Make sure the cluster has a root password and return it.
    ///
    /// A password already published by any previous leader wins over the
    /// local one, so leadership changes never rotate the credential.
    pub fn ensure_root_pwd(
        &self,
        dir: &mut dyn PeerDirectory,
        token: &LeaderToken,
        local_pwd: &str,
    ) -> Result<String, ClusterError> {
        if let Some(existing) = self.root_pwd(dir) {
            return Ok(existing);
        }
        info!("Publishing cluster root password");
        ApplicationWriter::new(dir, token, &self.relation).set_root_pwd(local_pwd)?;
        Ok(local_pwd.to_string())
    }

    /// Resolve the bootstrap volume list.
    ///
    /// The leader computes it and publishes it when it changed. Followers use
    /// the leader's value verbatim and only recompute to cross-check it.
    pub fn resolve_volumes(
        &self,
        dir: &mut dyn PeerDirectory,
        token: Option<&LeaderToken>,
        self_url: &str,
        self_folders: &[String],
    ) -> Result<VolumeSource, ClusterError> {
        let peers = self.membership(dir, 0).peers();
        let computed = VolumeSetResolver::resolve(self_url, self_folders, &peers)?;
        let published = self.application_record(dir).minio_volumes;

        match token {
            Some(token) => {
                let encoded = computed.to_published();
                if published.as_deref() != Some(encoded.as_str()) {
                    info!(volumes = computed.len(), "Publishing cluster volumes");
                    ApplicationWriter::new(dir, token, &self.relation)
                        .set_minio_volumes(&encoded)?;
                }
                Ok(VolumeSource::Authoritative(computed))
            }
            None => match published {
                Some(raw) => {
                    let leader = VolumeSet::from_published(&raw);
                    if leader != computed {
                        warn!(
                            leader = %leader,
                            local = %computed,
                            "Local volume view differs from the leader's, using the leader's"
                        );
                    }
                    Ok(VolumeSource::Authoritative(leader))
                }
                None => {
                    debug!("Leader has not published volumes yet");
                    Ok(VolumeSource::Pending)
                }
            },
        }
    }
}

// relation/records.rs - Typed Relation Records

use std::collections::BTreeSet;
use tracing::warn;

use super::directory::{RelationData, UnitId};

/// Field names on the wire
pub mod keys {
    pub const NUM_DISKS: &str = "num_disks";
    pub const URL: &str = "url";
    pub const USED_FOLDERS: &str = "used_folders";
    pub const SANS: &str = "sans";
    pub const ACK_PEER_RESTABLISHED: &str = "ack_peer_restablished";
    pub const DEPARTING: &str = "departing";
    pub const RESTART_LOCK: &str = "restart_lock";

    pub const ROOT_PWD: &str = "root_pwd";
    pub const MINIO_VOLUMES: &str = "minio_volumes";
    pub const PEERS_GONE: &str = "peers_gone";
    pub const RESTART_LOCK_HOLDER: &str = "restart_lock_holder";
}

/// Value of [`keys::RESTART_LOCK`] while a unit wants the restart lock
pub const LOCK_REQUESTED: &str = "requested";

/// Facts a unit publishes about itself on the peer relation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRecord {
    pub unit: UnitId,

    /// Number of storage devices attached to the unit
    pub num_disks: u32,

    /// `scheme://host:port` under which the unit serves Minio
    pub url: Option<String>,

    /// Data folders backing the unit's disks, in mount order
    pub used_folders: Vec<String>,

    /// TLS subject alternative names the unit answers to
    pub sans: BTreeSet<String>,

    /// Set by a rejoining unit once it has seen the cluster again
    pub ack_peer_restablished: bool,

    /// Set on graceful shutdown, before the unit leaves the relation
    pub departing: bool,

    /// Set while the unit is asking for the restart lock
    pub restart_lock: bool,
}

impl PeerRecord {
    /// Decode a unit's relation data. Missing or malformed fields count as
    /// not yet published.
    pub fn from_relation_data(unit: UnitId, data: &RelationData) -> Self {
        let num_disks = match data.get(keys::NUM_DISKS) {
            Some(raw) => raw.trim().parse::<u32>().unwrap_or_else(|e| {
                warn!(unit = %unit, value = %raw, "Ignoring malformed num_disks: {}", e);
                0
            }),
            None => 0,
        };

        Self {
            num_disks,
            url: data
                .get(keys::URL)
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            used_folders: split_list(data.get(keys::USED_FOLDERS)),
            sans: split_list(data.get(keys::SANS)).into_iter().collect(),
            ack_peer_restablished: parse_flag(data.get(keys::ACK_PEER_RESTABLISHED)),
            departing: parse_flag(data.get(keys::DEPARTING)),
            restart_lock: data
                .get(keys::RESTART_LOCK)
                .is_some_and(|v| v == LOCK_REQUESTED),
            unit,
        }
    }

    /// A peer contributes volumes once it has published both its URL and folders
    pub fn is_contributing(&self) -> bool {
        self.url.is_some() && !self.used_folders.is_empty()
    }
}

/// Cluster-wide facts, written by the leader only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationRecord {
    pub root_pwd: Option<String>,

    /// Leader-computed, quoted, space-joined volume list
    pub minio_volumes: Option<String>,

    /// Ungraceful departures minus acknowledged recoveries
    pub peers_gone: i64,

    pub restart_lock_holder: Option<UnitId>,
}

impl ApplicationRecord {
    pub fn from_relation_data(data: &RelationData) -> Self {
        let peers_gone = match data.get(keys::PEERS_GONE) {
            Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|e| {
                warn!(value = %raw, "Ignoring malformed peers_gone: {}", e);
                0
            }),
            None => 0,
        };

        Self {
            root_pwd: non_empty(data.get(keys::ROOT_PWD)),
            minio_volumes: non_empty(data.get(keys::MINIO_VOLUMES)),
            peers_gone,
            restart_lock_holder: non_empty(data.get(keys::RESTART_LOCK_HOLDER)).map(UnitId::new),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

fn split_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_flag(value: Option<&String>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> RelationData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_peer_record_decoding() {
        let record = PeerRecord::from_relation_data(
            "minio/1".into(),
            &data(&[
                ("num_disks", "2"),
                ("url", "http://minio-1.test:9000"),
                ("used_folders", "/data1,/data2"),
                ("sans", "10.0.0.1,minio-1.test"),
                ("ack_peer_restablished", "True"),
            ]),
        );

        assert_eq!(record.num_disks, 2);
        assert_eq!(record.url.as_deref(), Some("http://minio-1.test:9000"));
        assert_eq!(record.used_folders, vec!["/data1", "/data2"]);
        assert!(record.sans.contains("minio-1.test"));
        assert!(record.ack_peer_restablished);
        assert!(!record.departing);
        assert!(record.is_contributing());
    }

    #[test]
    fn test_partial_peer_record_is_not_contributing() {
        let record =
            PeerRecord::from_relation_data("minio/2".into(), &data(&[("num_disks", "4")]));
        assert_eq!(record.num_disks, 4);
        assert!(record.url.is_none());
        assert!(!record.is_contributing());
    }

    #[test]
    fn test_malformed_disk_count_treated_as_absent() {
        let record =
            PeerRecord::from_relation_data("minio/2".into(), &data(&[("num_disks", "two")]));
        assert_eq!(record.num_disks, 0);
    }

    #[test]
    fn test_default_record_is_unpublished() {
        let record = PeerRecord::default();
        assert_eq!(record.unit, UnitId::default());
        assert!(record.unit.as_str().is_empty());
        assert_eq!(record.num_disks, 0);
        assert!(!record.restart_lock);
        assert!(!record.is_contributing());
    }

    #[test]
    fn test_application_record_decoding() {
        let record = ApplicationRecord::from_relation_data(&data(&[
            ("root_pwd", "testtest"),
            ("minio_volumes", "\"http://a:9000/data1\""),
            ("peers_gone", "2"),
            ("restart_lock_holder", "minio/1"),
        ]));
        assert_eq!(record.root_pwd.as_deref(), Some("testtest"));
        assert_eq!(record.peers_gone, 2);
        assert_eq!(record.restart_lock_holder, Some(UnitId::from("minio/1")));

        let empty = ApplicationRecord::from_relation_data(&RelationData::new());
        assert_eq!(empty, ApplicationRecord::default());
    }
}

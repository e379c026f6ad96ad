// cluster/volumes.rs - Bootstrap Volume Resolution

use std::collections::BTreeSet;
use std::fmt;

use super::ClusterError;
use crate::relation::PeerRecord;

/// Join an endpoint URL and a data folder into a volume URI
pub fn volume_uri(endpoint: &str, folder: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        folder.trim_start_matches('/')
    )
}

/// Ordered list of volumes Minio is started with.
///
/// Minio picks its local bootstrap node by looking at which entry comes
/// first, so order is part of the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSet(Vec<String>);

impl VolumeSet {
    /// Sort the given volumes ascending
    pub fn sorted(mut volumes: Vec<String>) -> Self {
        volumes.sort();
        Self(volumes)
    }

    /// Volumes of a unit running without peers: bare local folders
    pub fn standalone(folders: &[String]) -> Self {
        Self(folders.to_vec())
    }

    pub fn volumes(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Encode as the single quoted token published in application data
    pub fn to_published(&self) -> String {
        format!("\"{}\"", self.0.join(" "))
    }

    /// Decode a leader-published value, keeping the leader's order
    pub fn from_published(raw: &str) -> Self {
        Self(
            raw.trim()
                .trim_matches('"')
                .split_whitespace()
                .map(String::from)
                .collect(),
        )
    }

    /// Whether the first volume is served by the given endpoint
    pub fn bootstrap_is_local(&self, self_url: &str) -> bool {
        let prefix = format!("{}/", self_url.trim_end_matches('/'));
        self.first().is_some_and(|v| v.starts_with(&prefix))
    }
}

impl fmt::Display for VolumeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Where a unit got its volume list from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    /// Computed by the leader, or read verbatim from its published value
    Authoritative(VolumeSet),

    /// The leader has not published yet
    Pending,
}

/// Expands peer endpoints into the globally ordered volume list
pub struct VolumeSetResolver;

impl VolumeSetResolver {
    /// Every volume contributed by the local unit and by peers that have
    /// published both their URL and their folders. Peers still joining are
    /// skipped.
    pub fn expand(
        self_url: &str,
        self_folders: &[String],
        peers: &[PeerRecord],
    ) -> Result<Vec<String>, ClusterError> {
        let mut endpoints = BTreeSet::new();
        endpoints.insert(self_url.trim_end_matches('/').to_string());

        let mut volumes: Vec<String> = self_folders
            .iter()
            .map(|f| volume_uri(self_url, f))
            .collect();

        for peer in peers.iter().filter(|p| p.is_contributing()) {
            let Some(url) = peer.url.as_deref() else {
                continue;
            };
            if !endpoints.insert(url.trim_end_matches('/').to_string()) {
                return Err(ClusterError::DuplicateEndpoint(url.to_string()));
            }
            volumes.extend(peer.used_folders.iter().map(|f| volume_uri(url, f)));
        }

        Ok(volumes)
    }

    /// Deterministic volume list: every unit observing the same peers gets
    /// the same answer.
    pub fn resolve(
        self_url: &str,
        self_folders: &[String],
        peers: &[PeerRecord],
    ) -> Result<VolumeSet, ClusterError> {
        Self::expand(self_url, self_folders, peers).map(VolumeSet::sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::UnitId;
    use proptest::prelude::*;

    fn peer(n: u32, folders: &[&str]) -> PeerRecord {
        PeerRecord {
            unit: UnitId::new(format!("minio/{}", n)),
            num_disks: folders.len() as u32,
            url: Some(format!("http://minio-{}.test:9000", n)),
            used_folders: folders.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    fn folders() -> Vec<String> {
        vec!["/data1".into(), "/data2".into()]
    }

    #[test]
    fn test_volume_uri_join() {
        assert_eq!(
            volume_uri("http://minio-1.test:9000/", "/data1"),
            "http://minio-1.test:9000/data1"
        );
        assert_eq!(volume_uri("http://a:9000", "data2"), "http://a:9000/data2");
    }

    #[test]
    fn test_four_unit_cluster_volumes() {
        let peers = vec![
            peer(1, &["/data1", "/data2"]),
            peer(2, &["/data1", "/data2"]),
            peer(3, &["/data1", "/data2"]),
        ];
        let set =
            VolumeSetResolver::resolve("http://minio-0.test:9000", &folders(), &peers).unwrap();

        assert_eq!(set.len(), 8);
        assert_eq!(set.first(), Some("http://minio-0.test:9000/data1"));
        assert_eq!(
            set.volumes()[7],
            "http://minio-3.test:9000/data2".to_string()
        );
        assert!(set.volumes().windows(2).all(|w| w[0] <= w[1]));
        assert!(set.bootstrap_is_local("http://minio-0.test:9000"));
        assert!(!set.bootstrap_is_local("http://minio-1.test:9000"));
    }

    #[test]
    fn test_partial_peers_are_skipped() {
        let mut joining = peer(2, &[]);
        joining.url = None;
        let peers = vec![peer(1, &["/data1"]), joining];

        let set =
            VolumeSetResolver::resolve("http://minio-0.test:9000", &folders(), &peers).unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let mut clash = peer(1, &["/data1"]);
        clash.url = Some("http://minio-0.test:9000".into());

        let err = VolumeSetResolver::resolve("http://minio-0.test:9000", &folders(), &[clash])
            .unwrap_err();
        assert!(matches!(err, ClusterError::DuplicateEndpoint(_)));
    }

    #[test]
    fn test_published_form_keeps_order() {
        let set = VolumeSet::sorted(vec![
            "http://b:9000/data1".into(),
            "http://a:9000/data1".into(),
        ]);
        let published = set.to_published();
        assert_eq!(published, "\"http://a:9000/data1 http://b:9000/data1\"");
        assert_eq!(VolumeSet::from_published(&published), set);

        // A leader value is never re-sorted by readers
        let leader = VolumeSet::from_published("\"http://b:9000/x http://a:9000/x\"");
        assert_eq!(leader.first(), Some("http://b:9000/x"));
    }

    #[test]
    fn test_standalone_uses_bare_folders() {
        let set = VolumeSet::standalone(&folders());
        assert_eq!(set.to_string(), "/data1 /data2");
    }

    proptest! {
        #[test]
        fn prop_resolution_independent_of_peer_order(
            disk_counts in proptest::collection::vec(1usize..4, 1..6),
            rotation in 0usize..6,
        ) {
            let all_folders = ["/data1", "/data2", "/data3"];
            let peers: Vec<PeerRecord> = disk_counts
                .iter()
                .enumerate()
                .map(|(i, n)| peer(i as u32 + 1, &all_folders[..*n]))
                .collect();
            let mut rotated = peers.clone();
            rotated.rotate_left(rotation % peers.len());

            let a = VolumeSetResolver::resolve("http://minio-0.test:9000", &folders(), &peers).unwrap();
            let b = VolumeSetResolver::resolve("http://minio-0.test:9000", &folders(), &rotated).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_every_unit_computes_the_same_set(unit_count in 2u32..6) {
            let records: Vec<PeerRecord> = (0..unit_count).map(|n| peer(n, &["/data1", "/data2"])).collect();

            let views: Vec<VolumeSet> = records
                .iter()
                .map(|me| {
                    let others: Vec<PeerRecord> =
                        records.iter().filter(|r| r.unit != me.unit).cloned().collect();
                    VolumeSetResolver::resolve(
                        me.url.as_deref().unwrap_or_default(),
                        &me.used_folders,
                        &others,
                    )
                    .unwrap()
                })
                .collect();

            for view in &views {
                prop_assert_eq!(view, &views[0]);
            }
        }
    }
}

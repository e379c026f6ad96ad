// cluster/disks.rs - Static Disk Layout

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Number of mount points reserved for attached storage
pub const DISK_MOUNT_COUNT: usize = 32;

/// One reserved mount point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskMount {
    pub path: String,
    pub fs_type: String,
    pub options: String,
}

/// Predictable folder names for storage devices, assigned in attach order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayout {
    pub mounts: Vec<DiskMount>,
}

impl Default for DiskLayout {
    fn default() -> Self {
        Self {
            mounts: (1..=DISK_MOUNT_COUNT)
                .map(|i| DiskMount {
                    path: format!("/data{}", i),
                    fs_type: "ext4".into(),
                    options: String::new(),
                })
                .collect(),
        }
    }
}

impl DiskLayout {
    /// Folders backing the first `attached` storage devices
    pub fn used_folders(&self, attached: usize) -> Vec<String> {
        if attached > self.mounts.len() {
            warn!(
                attached,
                capacity = self.mounts.len(),
                "More storage attached than mount points reserved, ignoring the rest"
            );
        }
        self.mounts
            .iter()
            .take(attached)
            .map(|m| m.path.clone())
            .collect()
    }
}

// monitoring/nrpe.rs - NRPE Checks

use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

use super::MonitoringError;
use crate::relation::{PeerDirectory, UnitId};

pub const NRPE_RELATION: &str = "nrpe-external-master";

const CHECK_TCP: &str = "/usr/lib/nagios/plugins/check_tcp";
const NRPE_CONFIG_DIR: &str = "etc/nagios/nrpe.d";

/// One NRPE command definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NrpeCheck {
    pub name: String,
    pub command: Vec<String>,
}

impl NrpeCheck {
    /// TCP probe of the Minio port, named after the unit
    pub fn tcp(unit: &UnitId, address: &str, port: u16) -> Self {
        Self {
            name: format!("check_{}", unit.as_str().replace('/', "_")),
            command: vec![
                CHECK_TCP.into(),
                "-H".into(),
                address.into(),
                "-p".into(),
                port.to_string(),
            ],
        }
    }

    /// `command[<name>]=<command line>` as read by the NRPE daemon
    pub fn render(&self) -> String {
        format!("command[{}]={}\n", self.name, self.command.join(" "))
    }

    /// Write the check definition below `root`, returning its path
    pub fn write(&self, root: &Path) -> Result<PathBuf, MonitoringError> {
        let dir = root.join(NRPE_CONFIG_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.cfg", self.name));
        std::fs::write(&path, self.render())?;
        Ok(path)
    }

    /// Register the check with the monitoring side of the relation
    pub fn publish(&self, dir: &mut dyn PeerDirectory) -> Result<(), MonitoringError> {
        if !dir.has_relation(NRPE_RELATION) {
            return Ok(());
        }
        let monitors = json!({
            "monitors": {
                "remote": {
                    "nrpe": {
                        &self.name: { "command": &self.name }
                    }
                }
            }
        });
        dir.set_unit_data(NRPE_RELATION, "monitors", &monitors.to_string())?;
        info!(check = %self.name, "Registered NRPE check");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{MemoryDirectory, RelationFabric};

    #[test]
    fn test_tcp_check() {
        let check = NrpeCheck::tcp(&"minio/2".into(), "10.0.0.2", 9000);
        assert_eq!(check.name, "check_minio_2");
        assert_eq!(
            check.render(),
            "command[check_minio_2]=/usr/lib/nagios/plugins/check_tcp -H 10.0.0.2 -p 9000\n"
        );
    }

    #[test]
    fn test_write_and_publish() {
        let root = tempfile::tempdir().unwrap();
        let check = NrpeCheck::tcp(&"minio/0".into(), "10.0.0.1", 9000);
        let path = check.write(root.path()).unwrap();
        assert!(path.ends_with("etc/nagios/nrpe.d/check_minio_0.cfg"));

        let fabric = RelationFabric::new();
        fabric.join(NRPE_RELATION, &"minio/0".into());
        let mut dir = MemoryDirectory::new(fabric, "minio/0".into(), false);
        check.publish(&mut dir).unwrap();

        let data = dir.unit_data(NRPE_RELATION, &"minio/0".into());
        let monitors: serde_json::Value = serde_json::from_str(&data["monitors"]).unwrap();
        assert_eq!(
            monitors["monitors"]["remote"]["nrpe"]["check_minio_0"]["command"],
            "check_minio_0"
        );
    }
}

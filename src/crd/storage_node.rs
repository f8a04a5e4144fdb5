//! StorageNode CRD
//!
//! Per-node inventory published by the node-local agent: the volume groups
//! present on the node and the node's iSCSI endpoint. Consumed read-only by
//! the placement scheduler; labels on the object feed topology filtering.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// StorageNode reports a node's capacity pools and export endpoint
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.blockstore.io",
    version = "v1",
    kind = "StorageNode",
    plural = "storagenodes",
    shortname = "snode",
    printcolumn = r#"{"name": "Portal", "type": "string", "jsonPath": ".spec.iscsi.portal"}"#,
    printcolumn = r#"{"name": "InitiatorName", "type": "string", "jsonPath": ".spec.iscsi.initiatorName"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageNodeSpec {
    /// Volume groups present on the node
    #[serde(default)]
    pub volume_groups: Vec<VolumeGroup>,

    /// iSCSI endpoint served by the node
    pub iscsi: IscsiInfo,
}

/// Node iSCSI endpoint info
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IscsiInfo {
    /// Network interface the portal binds to
    #[serde(default)]
    pub iface: String,

    /// Portal address (host:port)
    pub portal: String,

    /// Initiator IQN used when this node mounts remote volumes
    pub initiator_name: String,
}

/// One LVM volume group as reported by the node inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroup {
    /// Name of the volume group
    pub name: String,

    /// Unique identity of the volume group
    #[serde(default)]
    pub uuid: String,

    /// Total size in bytes
    pub size: u64,

    /// Available capacity in bytes
    pub free: u64,

    /// Number of logical volumes in the group
    #[serde(default)]
    pub lv_count: i32,

    /// Number of physical volumes constituting the group
    #[serde(default)]
    pub pv_count: i32,

    /// Number of snapshots in the group
    #[serde(default)]
    pub snap_count: i32,

    /// Maximum number of logical volumes allowed, 0 if unlimited
    #[serde(default)]
    pub max_lv: i32,

    /// Number of physical volumes missing from the system
    #[serde(default)]
    pub missing_pv_count: i32,
}

impl StorageNode {
    /// Get the name of this node
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_group_serde() {
        let json = r#"{"name": "data1", "size": 107374182400, "free": 53687091200}"#;
        let vg: VolumeGroup = serde_json::from_str(json).unwrap();
        assert_eq!(vg.name, "data1");
        assert_eq!(vg.lv_count, 0);
        assert_eq!(vg.free, 50 << 30);
    }
}

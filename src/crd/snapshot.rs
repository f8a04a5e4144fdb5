//! Snapshot CRD
//!
//! A read-only LVM snapshot of an existing volume, provisioned on the same
//! node and volume group as its source.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::volume::VolumeState;

/// Finalizer guarding teardown of the backing snapshot logical volume
pub const SNAPSHOT_FINALIZER: &str = "storage.blockstore.io/snapshot-protection";

/// Snapshot requests an LVM snapshot of a source volume. Ownership follows
/// the same discipline as Volume: only the reconciler on `spec.ownerNodeID`
/// acts on it.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.blockstore.io",
    version = "v1",
    kind = "Snapshot",
    plural = "snapshots",
    shortname = "snap",
    status = "SnapshotStatus",
    printcolumn = r#"{"name": "VolGroup", "type": "string", "jsonPath": ".spec.volGroup"}"#,
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.ownerNodeID"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.state"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Node that owns the volume group holding the snapshot
    #[serde(rename = "ownerNodeID")]
    pub owner_node_id: String,

    /// Volume group the snapshot lives in
    pub vol_group: String,

    /// Pattern the source volume was placed with, used by the scheduler to
    /// attribute the snapshot's pending capacity
    #[serde(default)]
    pub vg_pattern: String,

    /// Space reserved for the snapshot in bytes; 0 for thin snapshots
    #[serde(default)]
    pub snap_size: u64,

    /// Name of the volume this snapshot captures
    pub source_volume: String,
}

/// Status of a Snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    /// Current provisioning state; snapshots only use Pending/Ready/Failed
    #[serde(default)]
    pub state: VolumeState,
}

impl Snapshot {
    /// Get the name of this snapshot
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Current state, Pending while no status exists
    pub fn state(&self) -> VolumeState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    /// Whether this node's reconciler owns the object
    pub fn is_owned_by(&self, node_id: &str) -> bool {
        self.spec.owner_node_id == node_id
    }

    /// Whether a deletion marker is set and teardown should run
    pub fn is_deletion_candidate(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

//! Volume CRD
//!
//! A Volume is a cluster-wide request for an LVM-backed block device on a
//! single node, exported over iSCSI to any node that mounts it. The object is
//! created by the scheduling caller and from then on mutated only by the
//! reconciler of the node named in `spec.ownerNodeID`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer guarding teardown of the backing logical volume and export
pub const VOLUME_FINALIZER: &str = "storage.blockstore.io/volume-protection";

/// Sentinel meaning no LUN has been mapped for this volume yet
pub const LUN_UNSET: i32 = -1;

// =============================================================================
// Volume CRD
// =============================================================================

/// Volume requests an LVM logical volume on one node, exported as an iSCSI
/// LUN. Placement fields are written once by the scheduler; the export fields
/// are filled in step by step by the owning node's reconciler so a restart
/// resumes at the first incomplete step.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.blockstore.io",
    version = "v1",
    kind = "Volume",
    plural = "volumes",
    shortname = "vol",
    status = "VolumeStatus",
    printcolumn = r#"{"name": "VolGroup", "type": "string", "jsonPath": ".spec.volGroup"}"#,
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.ownerNodeID"}"#,
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.capacity"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Node that owns the backing volume group. Cannot be changed after
    /// the volume has been provisioned.
    #[serde(rename = "ownerNodeID")]
    pub owner_node_id: String,

    /// Volume group the logical volume was (or will be) created in.
    /// Empty until the reconciler picks a pool.
    #[serde(default)]
    pub vol_group: String,

    /// Regex selecting candidate volume groups for this volume.
    pub vg_pattern: String,

    /// Requested capacity in bytes
    pub capacity: u64,

    /// Whether the volume may be mounted by more than one pod
    #[serde(default)]
    pub shared: bool,

    /// Whether the logical volume is thinly provisioned
    #[serde(default)]
    pub thin_provision: bool,

    /// iSCSI target exporting this volume; empty until created
    #[serde(default)]
    pub iscsi_target: String,

    /// LUN mapped under the target, or -1 while unmapped
    #[serde(default = "default_lun")]
    pub iscsi_lun: i32,

    /// Backstore block object name; empty until published
    #[serde(default)]
    pub iscsi_block: String,

    /// Set once access rules exist for every node's initiator
    #[serde(default)]
    pub iscsi_acl_is_set: bool,

    /// Nodes currently consuming this volume
    #[serde(default)]
    pub mount_nodes: Vec<String>,

    /// Name of the snapshot to clone from, if any
    #[serde(default)]
    pub data_source: Option<String>,

    /// Kind of data source
    #[serde(default)]
    pub data_source_type: Option<DataSourceType>,
}

fn default_lun() -> i32 {
    LUN_UNSET
}

/// Kind of object a volume is cloned from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DataSourceType {
    Snapshot,
}

// =============================================================================
// Status
// =============================================================================

/// Status of a Volume
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    /// Current provisioning state
    #[serde(default)]
    pub state: VolumeState,

    /// Error recorded when the state becomes Failed
    #[serde(default)]
    pub error: Option<VolumeError>,
}

/// Provisioning state of a volume. States only advance; Ready and Failed are
/// terminal for the reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VolumeState {
    #[default]
    Pending,
    Created,
    Cloning,
    Ready,
    Failed,
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeState::Pending => write!(f, "Pending"),
            VolumeState::Created => write!(f, "Created"),
            VolumeState::Cloning => write!(f, "Cloning"),
            VolumeState::Ready => write!(f, "Ready"),
            VolumeState::Failed => write!(f, "Failed"),
        }
    }
}

/// Error recorded on a volume that failed provisioning
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeError {
    pub code: VolumeErrorCode,
    pub message: String,
}

/// Class of provisioning failure, so callers can decide between re-placement
/// and operational escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VolumeErrorCode {
    /// System internal error
    Internal,
    /// The selected pools cannot fit the requested capacity
    InsufficientCapacity,
}

// =============================================================================
// Implementations
// =============================================================================

impl Volume {
    /// Get the name of this volume
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

    /// Whether a LUN has been mapped yet
    pub fn has_lun(&self) -> bool {
        self.spec.iscsi_lun != LUN_UNSET
    }

    /// Whether this volume clones from a snapshot
    pub fn has_snapshot_source(&self) -> bool {
        self.spec.data_source_type == Some(DataSourceType::Snapshot)
            && self.spec.data_source.as_deref().is_some_and(|s| !s.is_empty())
    }
}

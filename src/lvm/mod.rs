//! LVM backend
//!
//! Local logical volume management behind an async trait, plus the device
//! path conventions shared by the reconcilers and the export layer.

mod command;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use std::sync::Arc;

use crate::crd::{Snapshot, Volume, VolumeGroup};
use crate::error::Result;

pub use command::Lvm;

/// Prefix reserved by lvm2; logical volume names must not carry it
pub const SNAPSHOT_PREFIX: &str = "snapshot-";

/// Device path of a logical volume
pub fn dev_path(vg: &str, lv: &str) -> String {
    format!("/dev/{vg}/{lv}")
}

/// Device-mapper path of a logical volume. dm escapes hyphens in either
/// component by doubling them.
pub fn dev_mapper_path(vg: &str, lv: &str) -> String {
    format!(
        "/dev/mapper/{}-{}",
        vg.replace('-', "--"),
        lv.replace('-', "--")
    )
}

/// Logical volume name backing a snapshot object. Object names may carry the
/// snapshot- prefix but lvm2 reserves it, so it is stripped.
pub fn snapshot_lv_name(snapshot: &str) -> &str {
    snapshot.strip_prefix(SNAPSHOT_PREFIX).unwrap_or(snapshot)
}

/// Local volume-group and logical-volume management
#[async_trait]
pub trait LvmBackend: Send + Sync {
    /// Report all volume groups on the node
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>>;

    /// Create the logical volume for a Volume, succeeding if it exists
    async fn create_volume(&self, vol: &Volume) -> Result<()>;

    /// Remove the logical volume for a Volume, succeeding if absent
    async fn delete_volume(&self, vol: &Volume) -> Result<()>;

    /// Create the snapshot logical volume, succeeding if it exists
    async fn create_snapshot(&self, snap: &Snapshot) -> Result<()>;

    /// Remove the snapshot logical volume, succeeding if absent
    async fn delete_snapshot(&self, snap: &Snapshot) -> Result<()>;

    /// Whether a device path exists on this node
    async fn path_exists(&self, path: &str) -> Result<bool>;

    /// Block-copy one device onto another
    async fn clone_device(&self, source: &str, dest: &str) -> Result<()>;
}

pub type LvmBackendRef = Arc<dyn LvmBackend>;

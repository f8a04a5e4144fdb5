//! Custom Resource Definitions
//!
//! Typed cluster objects for the blockstore control plane. Conversion from
//! any loosely-typed wire representation happens at the watch boundary, never
//! inside the core.

mod snapshot;
mod storage_node;
mod volume;

pub use snapshot::{Snapshot, SnapshotSpec, SnapshotStatus, SNAPSHOT_FINALIZER};
pub use storage_node::{IscsiInfo, StorageNode, StorageNodeSpec, VolumeGroup};
pub use volume::{
    DataSourceType, Volume, VolumeError, VolumeErrorCode, VolumeSpec, VolumeState, VolumeStatus,
    LUN_UNSET, VOLUME_FINALIZER,
};

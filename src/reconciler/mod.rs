//! Provisioning state machines
//!
//! One reconciler per object kind. Each runs only on the node named in the
//! object's spec, walks the object toward Ready through persisted
//! intermediate states, and unwinds everything on deletion before releasing
//! the finalizer.

mod snapshot;
mod volume;
mod wait;

pub use snapshot::SnapshotReconciler;
pub use volume::VolumeReconciler;
pub use wait::{wait_snapshot_processed, wait_volume_deleted, wait_volume_processed};

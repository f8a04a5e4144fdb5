//! Blockstore Operator - Cluster Block Storage Control Plane
//!
//! A Kubernetes operator that provisions LVM-backed block volumes and exports
//! them over iSCSI. Placement is capacity-aware across nodes; provisioning
//! runs as a per-node reconciler over persisted intermediate states.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Cluster Objects (CRDs)                        │
//! │        Volume            Snapshot            StorageNode             │
//! └───────┬─────────────────────┬─────────────────────┬─────────────────┘
//!         │                     │                     │
//!         │ reconcile           │ reconcile           │ watch
//! ┌───────┴─────────────────────┴─────────┐  ┌────────┴────────────────┐
//! │        Provisioning Reconcilers       │  │   Placement Scheduler   │
//! │  (owner-node only, resumable ladder)  │  │  (per-pattern scoring,  │
//! │                                       │  │   pending reservations) │
//! └───────┬───────────────────┬───────────┘  └─────────────────────────┘
//!         │                   │                       ▲
//! ┌───────┴───────┐  ┌────────┴────────┐  ┌───────────┴─────────────────┐
//! │  LVM Backend  │  │ Device Control  │  │     Inventory Publisher     │
//! │ (lvcreate/vgs)│  │   (targetcli)   │  │  (vgs -> StorageNode sync)  │
//! └───────────────┘  └─────────────────┘  └─────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`crd`]: Custom Resource Definitions
//! - [`scheduler`]: Capacity-aware volume placement
//! - [`reconciler`]: Volume and snapshot provisioning state machines
//! - [`device`]: iSCSI target administration
//! - [`lvm`]: Logical volume management
//! - [`store`]: Cluster object persistence
//! - [`inventory`]: Node inventory publishing
//! - [`error`]: Error types and handling

pub mod crd;
pub mod device;
pub mod error;
pub mod inventory;
pub mod lvm;
pub mod reconciler;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use crd::{
    Snapshot, SnapshotSpec, SnapshotStatus, StorageNode, StorageNodeSpec, Volume, VolumeGroup,
    VolumeSpec, VolumeState, VolumeStatus,
};

pub use device::{DeviceControl, DeviceControlRef, TargetCli, TargetCliRunner};

pub use error::{Error, ErrorAction, Result};

pub use inventory::NodeSyncer;

pub use lvm::{Lvm, LvmBackend, LvmBackendRef};

pub use reconciler::{SnapshotReconciler, VolumeReconciler};

pub use scheduler::{SchedulerManager, TopologyRequirement, TopologySelector, VolumeScheduler};

pub use store::{ClusterStore, ClusterStoreRef, KubeStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

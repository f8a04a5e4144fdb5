//! Cluster object store
//!
//! The reconcilers and the inventory publisher talk to the API server only
//! through this trait, which keeps the provisioning logic testable against an
//! in-memory store.

mod kube_store;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::crd::{Snapshot, StorageNode, Volume, VolumeStatus};
use crate::error::Result;

pub use kube_store::KubeStore;

/// Persistence surface over the cluster objects
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_volume(&self, name: &str) -> Result<Volume>;

    /// Replace a volume's spec and metadata with the given object
    async fn update_volume(&self, vol: &Volume) -> Result<Volume>;

    async fn update_volume_status(&self, name: &str, status: &VolumeStatus) -> Result<()>;

    /// Drop the protection finalizer, letting the API server delete the object
    async fn remove_volume_finalizer(&self, name: &str) -> Result<()>;

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot>;

    /// Replace a snapshot's spec and metadata with the given object
    async fn update_snapshot(&self, snap: &Snapshot) -> Result<Snapshot>;

    async fn update_snapshot_status(&self, name: &str, state: crate::crd::VolumeState)
        -> Result<()>;

    async fn remove_snapshot_finalizer(&self, name: &str) -> Result<()>;

    async fn list_nodes(&self) -> Result<Vec<StorageNode>>;

    async fn get_node(&self, name: &str) -> Result<Option<StorageNode>>;

    /// Create or replace this node's inventory object
    async fn upsert_node(&self, node: &StorageNode) -> Result<()>;
}

pub type ClusterStoreRef = Arc<dyn ClusterStore>;

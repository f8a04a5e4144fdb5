//! In-memory ClusterStore for reconciler tests
//!
//! Mirrors the API-server behavior the reconcilers depend on: objects marked
//! for deletion disappear once their last finalizer is removed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use parking_lot::Mutex;

use crate::crd::{
    Snapshot, StorageNode, Volume, VolumeState, VolumeStatus, SNAPSHOT_FINALIZER, VOLUME_FINALIZER,
};
use crate::error::{Error, Result};

use super::ClusterStore;

#[derive(Default)]
struct MemoryState {
    volumes: BTreeMap<String, Volume>,
    snapshots: BTreeMap<String, Snapshot>,
    nodes: BTreeMap<String, StorageNode>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_volume(&self, vol: Volume) {
        self.state
            .lock()
            .volumes
            .insert(vol.name().to_string(), vol);
    }

    pub fn put_snapshot(&self, snap: Snapshot) {
        self.state
            .lock()
            .snapshots
            .insert(snap.name().to_string(), snap);
    }

    pub fn put_node(&self, node: StorageNode) {
        self.state
            .lock()
            .nodes
            .insert(node.name().to_string(), node);
    }

    /// Set the deletion marker the way the API server does on delete
    pub fn mark_volume_for_deletion(&self, name: &str) {
        if let Some(vol) = self.state.lock().volumes.get_mut(name) {
            vol.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    pub fn mark_snapshot_for_deletion(&self, name: &str) {
        if let Some(snap) = self.state.lock().snapshots.get_mut(name) {
            snap.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    pub fn volume_exists(&self, name: &str) -> bool {
        self.state.lock().volumes.contains_key(name)
    }

    pub fn snapshot_exists(&self, name: &str) -> bool {
        self.state.lock().snapshots.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<StorageNode> {
        self.state.lock().nodes.get(name).cloned()
    }
}

fn missing(kind: &str, name: &str) -> Error {
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_volume(&self, name: &str) -> Result<Volume> {
        self.state
            .lock()
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| missing("Volume", name))
    }

    async fn update_volume(&self, vol: &Volume) -> Result<Volume> {
        let mut state = self.state.lock();
        if !state.volumes.contains_key(vol.name()) {
            return Err(missing("Volume", vol.name()));
        }
        state.volumes.insert(vol.name().to_string(), vol.clone());
        Ok(vol.clone())
    }

    async fn update_volume_status(&self, name: &str, status: &VolumeStatus) -> Result<()> {
        let mut state = self.state.lock();
        let vol = state.volumes.get_mut(name).ok_or_else(|| missing("Volume", name))?;
        vol.status = Some(status.clone());
        Ok(())
    }

    async fn remove_volume_finalizer(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let vol = state.volumes.get_mut(name).ok_or_else(|| missing("Volume", name))?;
        if let Some(finalizers) = vol.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != VOLUME_FINALIZER);
        }
        let gone = vol.metadata.deletion_timestamp.is_some()
            && vol.metadata.finalizers.as_deref().unwrap_or_default().is_empty();
        if gone {
            state.volumes.remove(name);
        }
        Ok(())
    }

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot> {
        self.state
            .lock()
            .snapshots
            .get(name)
            .cloned()
            .ok_or_else(|| missing("Snapshot", name))
    }

    async fn update_snapshot(&self, snap: &Snapshot) -> Result<Snapshot> {
        let mut state = self.state.lock();
        if !state.snapshots.contains_key(snap.name()) {
            return Err(missing("Snapshot", snap.name()));
        }
        state
            .snapshots
            .insert(snap.name().to_string(), snap.clone());
        Ok(snap.clone())
    }

    async fn update_snapshot_status(&self, name: &str, new_state: VolumeState) -> Result<()> {
        let mut state = self.state.lock();
        let snap = state
            .snapshots
            .get_mut(name)
            .ok_or_else(|| missing("Snapshot", name))?;
        snap.status = Some(crate::crd::SnapshotStatus { state: new_state });
        Ok(())
    }

    async fn remove_snapshot_finalizer(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let snap = state
            .snapshots
            .get_mut(name)
            .ok_or_else(|| missing("Snapshot", name))?;
        if let Some(finalizers) = snap.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != SNAPSHOT_FINALIZER);
        }
        let gone = snap.metadata.deletion_timestamp.is_some()
            && snap.metadata.finalizers.as_deref().unwrap_or_default().is_empty();
        if gone {
            state.snapshots.remove(name);
        }
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<StorageNode>> {
        Ok(self.state.lock().nodes.values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Option<StorageNode>> {
        Ok(self.state.lock().nodes.get(name).cloned())
    }

    async fn upsert_node(&self, node: &StorageNode) -> Result<()> {
        self.state
            .lock()
            .nodes
            .insert(node.name().to_string(), node.clone());
        Ok(())
    }
}

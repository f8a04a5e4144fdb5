//! ClusterStore backed by the Kubernetes API server

use async_trait::async_trait;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

use crate::crd::{
    Snapshot, StorageNode, Volume, VolumeState, VolumeStatus, SNAPSHOT_FINALIZER, VOLUME_FINALIZER,
};
use crate::error::{Error, Result};

use super::ClusterStore;

/// API-server backed store, scoped to one namespace
pub struct KubeStore {
    volumes: Api<Volume>,
    snapshots: Api<Snapshot>,
    nodes: Api<StorageNode>,
}

impl KubeStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            volumes: Api::namespaced(client.clone(), namespace),
            snapshots: Api::namespaced(client.clone(), namespace),
            nodes: Api::namespaced(client, namespace),
        }
    }
}

fn not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_volume(&self, name: &str) -> Result<Volume> {
        self.volumes.get(name).await.map_err(|e| {
            if not_found(&e) {
                Error::ResourceNotFound {
                    kind: "Volume".to_string(),
                    name: name.to_string(),
                }
            } else {
                e.into()
            }
        })
    }

    async fn update_volume(&self, vol: &Volume) -> Result<Volume> {
        Ok(self
            .volumes
            .replace(vol.name(), &PostParams::default(), vol)
            .await?)
    }

    async fn update_volume_status(&self, name: &str, status: &VolumeStatus) -> Result<()> {
        let patch = Patch::Merge(json!({ "status": status }));
        self.volumes
            .patch_status(name, &PatchParams::default(), &patch)
            .await?;
        Ok(())
    }

    async fn remove_volume_finalizer(&self, name: &str) -> Result<()> {
        let mut vol = self.get_volume(name).await?;
        if let Some(finalizers) = vol.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != VOLUME_FINALIZER);
        }
        self.volumes
            .replace(name, &PostParams::default(), &vol)
            .await?;
        debug!(volume = name, "removed finalizer");
        Ok(())
    }

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot> {
        self.snapshots.get(name).await.map_err(|e| {
            if not_found(&e) {
                Error::ResourceNotFound {
                    kind: "Snapshot".to_string(),
                    name: name.to_string(),
                }
            } else {
                e.into()
            }
        })
    }

    async fn update_snapshot(&self, snap: &Snapshot) -> Result<Snapshot> {
        Ok(self
            .snapshots
            .replace(snap.name(), &PostParams::default(), snap)
            .await?)
    }

    async fn update_snapshot_status(&self, name: &str, state: VolumeState) -> Result<()> {
        let patch = Patch::Merge(json!({ "status": { "state": state } }));
        self.snapshots
            .patch_status(name, &PatchParams::default(), &patch)
            .await?;
        Ok(())
    }

    async fn remove_snapshot_finalizer(&self, name: &str) -> Result<()> {
        let mut snap = self.get_snapshot(name).await?;
        if let Some(finalizers) = snap.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != SNAPSHOT_FINALIZER);
        }
        self.snapshots
            .replace(name, &PostParams::default(), &snap)
            .await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<StorageNode>> {
        let list = self.nodes.list(&Default::default()).await?;
        Ok(list.items)
    }

    async fn get_node(&self, name: &str) -> Result<Option<StorageNode>> {
        match self.nodes.get(name).await {
            Ok(node) => Ok(Some(node)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert_node(&self, node: &StorageNode) -> Result<()> {
        match self.get_node(node.name()).await? {
            None => {
                self.nodes.create(&PostParams::default(), node).await?;
            }
            Some(existing) => {
                let mut replacement = node.clone();
                replacement.metadata.resource_version = existing.metadata.resource_version;
                self.nodes
                    .replace(node.name(), &PostParams::default(), &replacement)
                    .await?;
            }
        }
        Ok(())
    }
}

//! Snapshot reconciler
//!
//! Much smaller state machine than the volume one: snapshots have no export,
//! only a read-only logical volume on the source volume's node.

use std::sync::Arc;

use tracing::{info, warn};

use crate::crd::{Snapshot, VolumeState, SNAPSHOT_FINALIZER};
use crate::error::{Error, Result};
use crate::lvm::LvmBackendRef;
use crate::store::ClusterStoreRef;

/// Reconciles Snapshot objects owned by this node
pub struct SnapshotReconciler {
    node_id: String,
    store: ClusterStoreRef,
    lvm: LvmBackendRef,
}

impl SnapshotReconciler {
    pub fn new(node_id: impl Into<String>, store: ClusterStoreRef, lvm: LvmBackendRef) -> Arc<Self> {
        Arc::new(Self {
            node_id: node_id.into(),
            store,
            lvm,
        })
    }

    pub async fn reconcile(&self, name: &str) -> Result<()> {
        let snap = match self.store.get_snapshot(name).await {
            Ok(snap) => snap,
            Err(Error::ResourceNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        if !snap.is_owned_by(&self.node_id) {
            return Ok(());
        }

        if snap.is_deletion_candidate() {
            return self.teardown(snap).await;
        }

        match snap.state() {
            VolumeState::Ready | VolumeState::Failed => Ok(()),
            _ => match self.create(&snap).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_retryable() => Err(e),
                Err(e) => {
                    warn!(snapshot = name, error = %e, "snapshot creation failed");
                    self.store
                        .update_snapshot_status(name, VolumeState::Failed)
                        .await?;
                    Ok(())
                }
            },
        }
    }

    async fn create(&self, snap: &Snapshot) -> Result<()> {
        self.lvm.create_snapshot(snap).await?;

        // The finalizer must be in place before Ready is visible, or a
        // prompt delete removes the object without the LV ever torn down
        let mut snap = snap.clone();
        let finalizers = snap.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == SNAPSHOT_FINALIZER) {
            finalizers.push(SNAPSHOT_FINALIZER.to_string());
            self.store.update_snapshot(&snap).await?;
        }

        self.store
            .update_snapshot_status(snap.name(), VolumeState::Ready)
            .await?;
        info!(snapshot = snap.name(), source = %snap.spec.source_volume, "snapshot ready");
        Ok(())
    }

    async fn teardown(&self, snap: Snapshot) -> Result<()> {
        self.lvm.delete_snapshot(&snap).await?;
        self.store.remove_snapshot_finalizer(snap.name()).await?;
        info!(snapshot = snap.name(), "snapshot torn down");
        Ok(())
    }
}

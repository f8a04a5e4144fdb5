//! Node inventory publishing
//!
//! Periodically reports this node's volume groups and iSCSI endpoint as a
//! StorageNode object. The scheduler on every operator instance watches those
//! objects; an unchanged report is not re-written to keep watch traffic down.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crd::{IscsiInfo, StorageNode, StorageNodeSpec};
use crate::error::Result;
use crate::lvm::LvmBackendRef;
use crate::store::ClusterStoreRef;

/// Publishes this node's StorageNode object on an interval
pub struct NodeSyncer {
    node_id: String,
    iscsi: IscsiInfo,
    interval: Duration,
    store: ClusterStoreRef,
    lvm: LvmBackendRef,
}

impl NodeSyncer {
    pub fn new(
        node_id: impl Into<String>,
        iscsi: IscsiInfo,
        interval: Duration,
        store: ClusterStoreRef,
        lvm: LvmBackendRef,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            iscsi,
            interval,
            store,
            lvm,
        }
    }

    /// Report once; skips the write when nothing changed
    pub async fn sync_once(&self) -> Result<bool> {
        let groups = self.lvm.list_volume_groups().await?;
        let spec = StorageNodeSpec {
            volume_groups: groups,
            iscsi: self.iscsi.clone(),
        };

        if let Some(existing) = self.store.get_node(&self.node_id).await? {
            if existing.spec == spec {
                debug!(node = %self.node_id, "inventory unchanged");
                return Ok(false);
            }
        }

        let mut node = StorageNode::new(&self.node_id, spec);
        node.metadata.name = Some(self.node_id.clone());
        self.store.upsert_node(&node).await?;
        info!(node = %self.node_id, "published inventory");
        Ok(true)
    }

    /// Report until canceled
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.sync_once().await {
                warn!(node = %self.node_id, error = %e, "inventory sync failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

//! Blocking waits on object state
//!
//! Callers that need a synchronous answer, such as a provisioning RPC
//! handler, poll the store until the reconciler on the owning node has
//! settled the object. Cancellation aborts the wait without touching the
//! object itself.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::crd::{Volume, VolumeState};
use crate::error::{Error, Result};
use crate::store::ClusterStoreRef;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait until the volume reaches Ready or Failed, returning the final object
pub async fn wait_volume_processed(
    store: &ClusterStoreRef,
    name: &str,
    cancel: &CancellationToken,
) -> Result<Volume> {
    loop {
        let vol = store.get_volume(name).await?;
        if matches!(vol.state(), VolumeState::Ready | VolumeState::Failed) {
            return Ok(vol);
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled(format!("volume {name}"))),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Wait until the volume object is gone from the store
pub async fn wait_volume_deleted(
    store: &ClusterStoreRef,
    name: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        match store.get_volume(name).await {
            Err(Error::ResourceNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
            Ok(_) => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled(format!("volume {name}"))),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Wait until the snapshot reaches Ready or Failed
pub async fn wait_snapshot_processed(
    store: &ClusterStoreRef,
    name: &str,
    cancel: &CancellationToken,
) -> Result<VolumeState> {
    loop {
        let snap = store.get_snapshot(name).await?;
        if matches!(snap.state(), VolumeState::Ready | VolumeState::Failed) {
            return Ok(snap.state());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled(format!("snapshot {name}"))),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

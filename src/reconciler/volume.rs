//! Volume reconciler
//!
//! Drives a Volume from Pending to Ready on the node that owns it. The
//! provisioning ladder persists the object after every completed step, so a
//! crashed reconciler resumes at the first incomplete step instead of
//! redoing work; every device operation underneath is idempotent.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::crd::{
    Volume, VolumeGroup, VolumeState, VolumeStatus, VOLUME_FINALIZER,
};
use crate::device::{generate_target_name, DeviceControlRef};
use crate::error::{Error, Result};
use crate::lvm::{dev_path, snapshot_lv_name, LvmBackendRef};
use crate::store::ClusterStoreRef;

// =============================================================================
// Volume Reconciler
// =============================================================================

/// Reconciles Volume objects owned by this node
pub struct VolumeReconciler {
    node_id: String,
    iscsi_userid: String,
    iscsi_password: String,
    store: ClusterStoreRef,
    device: DeviceControlRef,
    lvm: LvmBackendRef,
}

impl VolumeReconciler {
    pub fn new(
        node_id: impl Into<String>,
        iscsi_userid: impl Into<String>,
        iscsi_password: impl Into<String>,
        store: ClusterStoreRef,
        device: DeviceControlRef,
        lvm: LvmBackendRef,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id: node_id.into(),
            iscsi_userid: iscsi_userid.into(),
            iscsi_password: iscsi_password.into(),
            store,
            device,
            lvm,
        })
    }

    /// Reconcile one volume by name. Terminal provisioning failures are
    /// recorded on the object and absorbed; retryable errors propagate so
    /// the caller requeues.
    pub async fn reconcile(&self, name: &str) -> Result<()> {
        let vol = match self.store.get_volume(name).await {
            Ok(vol) => vol,
            Err(Error::ResourceNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        if !vol.is_owned_by(&self.node_id) {
            return Ok(());
        }

        if vol.is_deletion_candidate() {
            return self.teardown(vol).await;
        }

        match self.sync(vol).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let verr = e.to_volume_error();
                let terminal = !e.is_retryable()
                    || verr.code == crate::crd::VolumeErrorCode::InsufficientCapacity;
                if !terminal {
                    return Err(e);
                }
                warn!(volume = name, error = %e, "provisioning failed");
                self.store
                    .update_volume_status(
                        name,
                        &VolumeStatus {
                            state: VolumeState::Failed,
                            error: Some(verr),
                        },
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn sync(&self, vol: Volume) -> Result<()> {
        match vol.state() {
            // Terminal states never move again
            VolumeState::Ready | VolumeState::Failed => Ok(()),

            // Export exists; only the data copy remains
            VolumeState::Created | VolumeState::Cloning => self.finish(vol).await,

            VolumeState::Pending => {
                let vol = self.provision(vol).await?;
                self.finish(vol).await
            }
        }
    }

    // =========================================================================
    // Provisioning ladder
    // =========================================================================

    /// Create the logical volume and its export, persisting after each step
    async fn provision(&self, mut vol: Volume) -> Result<Volume> {
        vol = self.ensure_logical_volume(vol).await?;
        vol = self.ensure_target(vol).await?;
        vol = self.ensure_acls(vol).await?;
        vol = self.ensure_block(vol).await?;
        vol = self.ensure_lun(vol).await?;

        // Attach the protection finalizer with Created, before the clone
        // phase, so a provisioned export can never be deleted untorn
        let finalizers = vol.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == VOLUME_FINALIZER) {
            finalizers.push(VOLUME_FINALIZER.to_string());
            vol = self.store.update_volume(&vol).await?;
        }

        self.store
            .update_volume_status(
                vol.name(),
                &VolumeStatus {
                    state: VolumeState::Created,
                    error: None,
                },
            )
            .await?;
        info!(volume = vol.name(), vg = %vol.spec.vol_group, "volume created");
        Ok(vol)
    }

    /// Create the backing logical volume. A recorded pool is attempted
    /// first; otherwise candidates are tried tightest-fit-first and the
    /// chosen pool is persisted after the first successful creation.
    async fn ensure_logical_volume(&self, mut vol: Volume) -> Result<Volume> {
        let recorded = vol.spec.vol_group.clone();
        if !recorded.is_empty() {
            match self.lvm.create_volume(&vol).await {
                Ok(()) => return Ok(vol),
                Err(e) => {
                    warn!(volume = vol.name(), vg = %recorded, error = %e,
                        "recorded pool failed, re-selecting");
                }
            }
        }

        let pattern = Regex::new(&vol.spec.vg_pattern).map_err(|e| Error::InvalidVgPattern {
            pattern: vol.spec.vg_pattern.clone(),
            reason: e.to_string(),
        })?;

        let groups = self.lvm.list_volume_groups().await?;
        let ranked =
            vg_priority_list(&groups, &pattern, vol.spec.capacity, vol.spec.thin_provision);

        let mut last_err = None;
        for candidate in ranked {
            if candidate == recorded {
                continue;
            }
            vol.spec.vol_group = candidate;
            match self.lvm.create_volume(&vol).await {
                Ok(()) => return self.store.update_volume(&vol).await,
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::NoSuitableVolumeGroup {
            pattern: vol.spec.vg_pattern.clone(),
            requested: vol.spec.capacity,
        }))
    }

    /// Create the iSCSI target and set its portal-group credentials
    async fn ensure_target(&self, mut vol: Volume) -> Result<Volume> {
        if vol.spec.iscsi_target.is_empty() {
            vol.spec.iscsi_target = generate_target_name(&vol.spec.vol_group, vol.name());
        }
        self.device.create_target(&vol.spec.iscsi_target).await?;
        self.device
            .set_auth(&vol.spec.iscsi_target, &self.iscsi_userid, &self.iscsi_password)
            .await?;
        self.store.update_volume(&vol).await
    }

    /// Grant every node's initiator access; existing entries are skipped
    /// and the flag is only persisted once all grants have been applied.
    async fn ensure_acls(&self, mut vol: Volume) -> Result<Volume> {
        if vol.spec.iscsi_acl_is_set {
            return Ok(vol);
        }

        let nodes = self.store.list_nodes().await?;
        let initiators: Vec<&str> = nodes
            .iter()
            .map(|n| n.spec.iscsi.initiator_name.as_str())
            .filter(|i| !i.is_empty())
            .collect();

        let existing: HashSet<String> = self
            .device
            .list_acls(&vol.spec.iscsi_target)
            .await?
            .into_iter()
            .collect();

        let mut applied = 0;
        for initiator in &initiators {
            if existing.contains(*initiator) {
                applied += 1;
                continue;
            }
            match self
                .device
                .set_acl(
                    &vol.spec.iscsi_target,
                    initiator,
                    &self.iscsi_userid,
                    &self.iscsi_password,
                )
                .await
            {
                Ok(()) => applied += 1,
                Err(e) => warn!(
                    volume = vol.name(),
                    initiator, error = %e, "acl grant failed"
                ),
            }
        }

        if applied < initiators.len() {
            return Err(Error::AclIncomplete {
                target: vol.spec.iscsi_target.clone(),
                applied,
                total: initiators.len(),
            });
        }

        vol.spec.iscsi_acl_is_set = true;
        self.store.update_volume(&vol).await
    }

    /// Register the logical volume as a backstore block
    async fn ensure_block(&self, mut vol: Volume) -> Result<Volume> {
        let block = vol.name().to_string();
        let device = dev_path(&vol.spec.vol_group, vol.name());
        self.device.publish_block(&block, &device).await?;
        if vol.spec.iscsi_block != block {
            vol.spec.iscsi_block = block;
            vol = self.store.update_volume(&vol).await?;
        }
        Ok(vol)
    }

    /// Map the backstore as a LUN under the target
    async fn ensure_lun(&self, mut vol: Volume) -> Result<Volume> {
        if vol.has_lun() {
            return Ok(vol);
        }
        let lun = self
            .device
            .mount_lun(&vol.spec.iscsi_target, &vol.spec.iscsi_block)
            .await?;
        vol.spec.iscsi_lun = lun;
        self.store.update_volume(&vol).await
    }

    // =========================================================================
    // Clone and readiness
    // =========================================================================

    /// Copy snapshot data in if the volume has a source, then mark Ready
    async fn finish(&self, vol: Volume) -> Result<()> {
        if vol.has_snapshot_source() {
            self.clone_from_source(&vol).await?;
        }

        self.store
            .update_volume_status(
                vol.name(),
                &VolumeStatus {
                    state: VolumeState::Ready,
                    error: None,
                },
            )
            .await?;
        info!(volume = vol.name(), "volume ready");
        Ok(())
    }

    async fn clone_from_source(&self, vol: &Volume) -> Result<()> {
        let source_name = vol.spec.data_source.as_deref().unwrap_or_default();
        let snap = self.store.get_snapshot(source_name).await?;

        let source = dev_path(&snap.spec.vol_group, snapshot_lv_name(snap.name()));
        let dest = dev_path(&vol.spec.vol_group, vol.name());

        if !self.lvm.path_exists(&source).await? {
            return Err(Error::DevicePathMissing { path: source });
        }
        if !self.lvm.path_exists(&dest).await? {
            return Err(Error::DevicePathMissing { path: dest });
        }

        self.store
            .update_volume_status(
                vol.name(),
                &VolumeStatus {
                    state: VolumeState::Cloning,
                    error: None,
                },
            )
            .await?;

        self.lvm.clone_device(&source, &dest).await?;
        info!(volume = vol.name(), snapshot = snap.name(), "clone finished");
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release the export and the logical volume, then drop the finalizer.
    /// Runs strictly top-down; a failure leaves the rest for the retry.
    async fn teardown(&self, vol: Volume) -> Result<()> {
        if vol.has_lun() {
            self.device
                .unmount_lun(&vol.spec.iscsi_target, vol.spec.iscsi_lun)
                .await?;
        }
        if !vol.spec.iscsi_block.is_empty() {
            self.device.unpublish_block(&vol.spec.iscsi_block).await?;
        }
        if !vol.spec.iscsi_target.is_empty() {
            self.device.delete_target(&vol.spec.iscsi_target).await?;
        }
        if !vol.spec.vol_group.is_empty() {
            self.lvm.delete_volume(&vol).await?;
        }

        self.store.remove_volume_finalizer(vol.name()).await?;
        info!(volume = vol.name(), "volume torn down");
        Ok(())
    }
}

// =============================================================================
// Volume group selection
// =============================================================================

/// Rank the candidate volume groups for a new volume, tightest fit first.
/// Groups must match the pattern and, unless the volume is thin, hold the
/// requested capacity. Ties break on group name.
fn vg_priority_list(
    groups: &[VolumeGroup],
    pattern: &Regex,
    required: u64,
    thin: bool,
) -> Vec<String> {
    let mut fitting: Vec<&VolumeGroup> = groups
        .iter()
        .filter(|vg| pattern.is_match(&vg.name))
        .filter(|vg| thin || vg.free >= required)
        .collect();
    fitting.sort_by(|a, b| a.free.cmp(&b.free).then_with(|| a.name.cmp(&b.name)));
    fitting.into_iter().map(|vg| vg.name.clone()).collect()
}

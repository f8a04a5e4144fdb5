//! iSCSI device control
//!
//! Wraps the kernel target administration tool behind an async trait so the
//! reconcilers never spell command syntax themselves. All operations are
//! idempotent: re-creating an existing object and removing an absent one both
//! succeed, which is what lets a half-finished provisioning ladder re-run
//! from the top.

mod script;
mod targetcli;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

pub use script::{ScriptRunner, ScriptRunnerRef, TargetCliRunner, TargetCliScript};
pub use targetcli::{generate_target_name, TargetCli};

/// One LUN mapping under a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunDevice {
    /// LUN id
    pub id: i32,
    /// Backstore block object backing the LUN
    pub disk: String,
    /// Device path the backstore points at
    pub device: String,
}

/// Control surface over the node's iSCSI target subsystem
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Create a target, succeeding if it already exists
    async fn create_target(&self, target: &str) -> Result<()>;

    /// Delete a target, succeeding if it is already gone
    async fn delete_target(&self, target: &str) -> Result<()>;

    /// List the names of all targets
    async fn list_targets(&self) -> Result<Vec<String>>;

    /// Grant an initiator access to a target and bind CHAP credentials to
    /// the entry, succeeding if already granted
    async fn set_acl(
        &self,
        target: &str,
        initiator: &str,
        userid: &str,
        password: &str,
    ) -> Result<()>;

    /// List the initiators granted access to a target
    async fn list_acls(&self, target: &str) -> Result<Vec<String>>;

    /// Set CHAP credentials on a target's portal group
    async fn set_auth(&self, target: &str, userid: &str, password: &str) -> Result<()>;

    /// Enable discovery authentication node-wide with CHAP credentials
    async fn set_discovery_auth(&self, userid: &str, password: &str) -> Result<()>;

    /// Register a device path as a backstore block, succeeding if present
    async fn publish_block(&self, name: &str, device: &str) -> Result<()>;

    /// Remove a backstore block, succeeding if absent
    async fn unpublish_block(&self, name: &str) -> Result<()>;

    /// Map a backstore block as a LUN under a target and return the LUN id.
    /// If the mapping already exists the existing id is returned.
    async fn mount_lun(&self, target: &str, block: &str) -> Result<i32>;

    /// Unmap a LUN, succeeding if already unmapped
    async fn unmount_lun(&self, target: &str, lun: i32) -> Result<()>;

    /// List the LUN mappings under a target
    async fn list_luns(&self, target: &str) -> Result<Vec<LunDevice>>;
}

pub type DeviceControlRef = Arc<dyn DeviceControl>;

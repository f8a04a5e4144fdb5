//! In-memory DeviceControl for reconciler tests

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::{DeviceControl, LunDevice};

#[derive(Default)]
struct FakeState {
    targets: BTreeSet<String>,
    acls: BTreeMap<String, BTreeSet<String>>,
    blocks: BTreeMap<String, String>,
    luns: BTreeMap<String, Vec<LunDevice>>,
    next_lun: i32,
    calls: Vec<String>,
    fail_on: Option<String>,
}

/// Tracks target state in memory and records the operation order
#[derive(Default)]
pub struct FakeDevice {
    state: Mutex<FakeState>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call whose recorded name starts with `op`
    pub fn fail_on(&self, op: &str) {
        self.state.lock().fail_on = Some(op.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn has_target(&self, target: &str) -> bool {
        self.state.lock().targets.contains(target)
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.state.lock().blocks.contains_key(name)
    }

    pub fn acl_count(&self, target: &str) -> usize {
        self.state
            .lock()
            .acls
            .get(target)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    fn record(&self, call: String) -> Result<()> {
        let mut state = self.state.lock();
        let fail = state
            .fail_on
            .as_ref()
            .is_some_and(|op| call.starts_with(op.as_str()));
        state.calls.push(call.clone());
        if fail {
            state.fail_on = None;
            return Err(Error::DeviceCommand(format!("injected failure: {call}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for FakeDevice {
    async fn create_target(&self, target: &str) -> Result<()> {
        self.record(format!("create_target {target}"))?;
        self.state.lock().targets.insert(target.to_string());
        Ok(())
    }

    async fn delete_target(&self, target: &str) -> Result<()> {
        self.record(format!("delete_target {target}"))?;
        let mut state = self.state.lock();
        state.targets.remove(target);
        state.acls.remove(target);
        state.luns.remove(target);
        Ok(())
    }

    async fn list_targets(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().targets.iter().cloned().collect())
    }

    async fn set_acl(
        &self,
        target: &str,
        initiator: &str,
        _userid: &str,
        _password: &str,
    ) -> Result<()> {
        self.record(format!("set_acl {target} {initiator}"))?;
        self.state
            .lock()
            .acls
            .entry(target.to_string())
            .or_default()
            .insert(initiator.to_string());
        Ok(())
    }

    async fn list_acls(&self, target: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .acls
            .get(target)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_auth(&self, target: &str, userid: &str, _password: &str) -> Result<()> {
        self.record(format!("set_auth {target} {userid}"))
    }

    async fn set_discovery_auth(&self, userid: &str, _password: &str) -> Result<()> {
        self.record(format!("set_discovery_auth {userid}"))
    }

    async fn publish_block(&self, name: &str, device: &str) -> Result<()> {
        self.record(format!("publish_block {name}"))?;
        self.state
            .lock()
            .blocks
            .insert(name.to_string(), device.to_string());
        Ok(())
    }

    async fn unpublish_block(&self, name: &str) -> Result<()> {
        self.record(format!("unpublish_block {name}"))?;
        self.state.lock().blocks.remove(name);
        Ok(())
    }

    async fn mount_lun(&self, target: &str, block: &str) -> Result<i32> {
        self.record(format!("mount_lun {target} {block}"))?;
        let mut state = self.state.lock();
        let device = state.blocks.get(block).cloned().unwrap_or_default();
        let luns = state.luns.entry(target.to_string()).or_default();
        if let Some(existing) = luns.iter().find(|l| l.disk == block) {
            return Ok(existing.id);
        }
        let id = state.next_lun;
        state.next_lun += 1;
        state.luns.entry(target.to_string()).or_default().push(LunDevice {
            id,
            disk: block.to_string(),
            device,
        });
        Ok(id)
    }

    async fn unmount_lun(&self, target: &str, lun: i32) -> Result<()> {
        self.record(format!("unmount_lun {target} {lun}"))?;
        if let Some(luns) = self.state.lock().luns.get_mut(target) {
            luns.retain(|l| l.id != lun);
        }
        Ok(())
    }

    async fn list_luns(&self, target: &str) -> Result<Vec<LunDevice>> {
        Ok(self
            .state
            .lock()
            .luns
            .get(target)
            .cloned()
            .unwrap_or_default())
    }
}

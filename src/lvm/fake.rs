//! In-memory LvmBackend for reconciler tests

use std::collections::BTreeSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crd::{Snapshot, Volume, VolumeGroup};
use crate::error::{Error, Result};

use super::{dev_path, snapshot_lv_name, LvmBackend};

#[derive(Default)]
struct FakeState {
    groups: Vec<VolumeGroup>,
    paths: BTreeSet<String>,
    clones: Vec<(String, String)>,
    calls: Vec<String>,
    fail_create: Option<String>,
}

/// Tracks logical volumes as device paths in memory
#[derive(Default)]
pub struct FakeLvm {
    state: Mutex<FakeState>,
}

impl FakeLvm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: Vec<VolumeGroup>) -> Self {
        let fake = Self::new();
        fake.state.lock().groups = groups;
        fake
    }

    /// Make the next lvcreate fail with the given output text
    pub fn fail_next_create(&self, output: &str) {
        self.state.lock().fail_create = Some(output.to_string());
    }

    /// Seed a device path, e.g. a snapshot source
    pub fn add_path(&self, path: &str) {
        self.state.lock().paths.insert(path.to_string());
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.state.lock().paths.contains(path)
    }

    pub fn clones(&self) -> Vec<(String, String)> {
        self.state.lock().clones.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn create_path(&self, call: String, path: String) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(output) = state.fail_create.take() {
            return Err(Error::LvmCommand {
                program: "lvcreate".to_string(),
                output,
            });
        }
        state.paths.insert(path);
        Ok(())
    }

    fn remove_path(&self, call: String, path: &str) {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.paths.remove(path);
    }
}

#[async_trait]
impl LvmBackend for FakeLvm {
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>> {
        Ok(self.state.lock().groups.clone())
    }

    async fn create_volume(&self, vol: &Volume) -> Result<()> {
        let path = dev_path(&vol.spec.vol_group, vol.name());
        self.create_path(format!("create_volume {}", vol.name()), path)
    }

    async fn delete_volume(&self, vol: &Volume) -> Result<()> {
        let path = dev_path(&vol.spec.vol_group, vol.name());
        self.remove_path(format!("delete_volume {}", vol.name()), &path);
        Ok(())
    }

    async fn create_snapshot(&self, snap: &Snapshot) -> Result<()> {
        let path = dev_path(&snap.spec.vol_group, snapshot_lv_name(snap.name()));
        self.create_path(format!("create_snapshot {}", snap.name()), path)
    }

    async fn delete_snapshot(&self, snap: &Snapshot) -> Result<()> {
        let path = dev_path(&snap.spec.vol_group, snapshot_lv_name(snap.name()));
        self.remove_path(format!("delete_snapshot {}", snap.name()), &path);
        Ok(())
    }

    async fn path_exists(&self, path: &str) -> Result<bool> {
        Ok(self.state.lock().paths.contains(path))
    }

    async fn clone_device(&self, source: &str, dest: &str) -> Result<()> {
        self.state
            .lock()
            .clones
            .push((source.to_string(), dest.to_string()));
        Ok(())
    }
}

//! Scheduler registry
//!
//! Volumes carry arbitrary volume-group patterns, so scheduler instances are
//! created on demand and memoized per pattern. Cluster events fan out to
//! every instance; each one decides relevance on its own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::crd::{Snapshot, StorageNode, Volume};
use crate::error::Result;

use super::scheduler::VolumeScheduler;
use super::topology::TopologyRequirement;

/// Registry of per-pattern schedulers
#[derive(Default)]
pub struct SchedulerManager {
    schedulers: Mutex<HashMap<String, Arc<VolumeScheduler>>>,
}

impl SchedulerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the scheduler for a pattern. A freshly created instance
    /// starts empty and fills from subsequent events or an explicit resync.
    pub fn scheduler_for(&self, pattern: &str) -> Result<Arc<VolumeScheduler>> {
        let mut schedulers = self.schedulers.lock();
        if let Some(existing) = schedulers.get(pattern) {
            return Ok(Arc::clone(existing));
        }
        let created = Arc::new(VolumeScheduler::new(pattern)?);
        schedulers.insert(pattern.to_string(), Arc::clone(&created));
        Ok(created)
    }

    /// Schedule a volume under the given pattern
    pub fn schedule_volume(
        &self,
        pattern: &str,
        name: &str,
        required_bytes: u64,
        topology: Option<&TopologyRequirement>,
    ) -> Result<String> {
        self.scheduler_for(pattern)?
            .schedule_volume(name, required_bytes, topology)
    }

    fn all(&self) -> Vec<Arc<VolumeScheduler>> {
        self.schedulers.lock().values().cloned().collect()
    }

    pub fn on_node_event(&self, node: &StorageNode) {
        for s in self.all() {
            s.on_node_event(node);
        }
    }

    pub fn on_volume_event(&self, vol: &Volume) {
        for s in self.all() {
            s.on_volume_event(vol);
        }
    }

    pub fn on_snapshot_event(&self, snap: &Snapshot) {
        for s in self.all() {
            s.on_snapshot_event(snap);
        }
    }

    /// Resync every known scheduler from a full cluster listing
    pub fn resync(&self, nodes: &[StorageNode], volumes: &[Volume], snapshots: &[Snapshot]) {
        for s in self.all() {
            s.resync(nodes, volumes, snapshots);
        }
    }
}

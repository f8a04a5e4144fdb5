//! Placement scheduler
//!
//! One instance per distinct volume-group pattern. Scores and ranks nodes,
//! reserves capacity optimistically under a single mutex, and clears
//! reservations as real inventory catches up with the objects it placed.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info};

use crate::crd::{Snapshot, StorageNode, Volume, VolumeState};
use crate::error::{Error, Result};

use super::node_view::NodeView;
use super::reservation::PendingReservation;
use super::topology::TopologyRequirement;

// =============================================================================
// Scheduler State
// =============================================================================

/// Everything the scheduler mutates, behind one mutex so concurrent
/// scheduling calls never observe the same pre-reservation state.
#[derive(Debug, Default)]
struct SchedulerState {
    /// Node name -> derived capacity view
    node_views: HashMap<String, NodeView>,
    /// Node name -> labels, for topology filtering
    node_labels: HashMap<String, BTreeMap<String, String>>,
    /// In-flight volumes that real inventory does not reflect yet
    pending_volumes: HashMap<String, PendingReservation>,
    /// In-flight snapshots that real inventory does not reflect yet
    pending_snapshots: HashMap<String, PendingReservation>,
}

// =============================================================================
// Volume Scheduler
// =============================================================================

/// Scheduler for one volume-group pattern
#[derive(Debug)]
pub struct VolumeScheduler {
    pattern_str: String,
    pattern: Regex,
    state: Mutex<SchedulerState>,
}

impl VolumeScheduler {
    /// Create a scheduler for the given pattern
    pub fn new(pattern_str: &str) -> Result<Self> {
        let pattern = Regex::new(pattern_str).map_err(|e| Error::InvalidVgPattern {
            pattern: pattern_str.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            pattern_str: pattern_str.to_string(),
            pattern,
            state: Mutex::new(SchedulerState::default()),
        })
    }

    /// The pattern this instance ranks nodes for
    pub fn pattern_str(&self) -> &str {
        &self.pattern_str
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Pick a node for a new volume of `required_bytes`, respecting the
    /// topology requirement, and reserve the capacity on the chosen node.
    ///
    /// Scoring, ranking, and reservation happen under one critical section.
    pub fn schedule_volume(
        &self,
        name: &str,
        required_bytes: u64,
        topology: Option<&TopologyRequirement>,
    ) -> Result<String> {
        let mut state = self.state.lock();

        let candidates = topology.and_then(|t| t.candidate_nodes(&state.node_labels));
        let ranked = Self::rank_nodes(&mut state);

        for node in &ranked {
            if let Some(allowed) = &candidates {
                if !allowed.contains(&node.node_name) {
                    continue;
                }
            }

            // Fit check discounts capacity already promised to in-flight
            // objects, otherwise concurrent requests overcommit the node
            // before its inventory catches up.
            let effective_free =
                node.max_free - node.pending_volume_size - node.pending_snapshot_size;
            if effective_free > required_bytes as i64 {
                info!(
                    volume = name,
                    node = %node.node_name,
                    score = node.score,
                    "scheduled volume"
                );
                state.pending_volumes.insert(
                    name.to_string(),
                    PendingReservation::new(name, &node.node_name, required_bytes),
                );
                return Ok(node.node_name.clone());
            }
        }

        Err(Error::NoSuitableNode {
            volume: name.to_string(),
            requested: required_bytes,
        })
    }

    /// Recompute pending counters and scores, then rank all views by score
    /// descending, node name ascending on ties so placement is reproducible.
    fn rank_nodes(state: &mut SchedulerState) -> Vec<NodeView> {
        for view in state.node_views.values_mut() {
            view.clear_pending();
        }

        for res in state.pending_volumes.values() {
            if let Some(view) = state.node_views.get_mut(&res.node_name) {
                view.pending_volume_num += 1;
                view.pending_volume_size += res.required_storage as i64;
            }
        }

        for res in state.pending_snapshots.values() {
            if let Some(view) = state.node_views.get_mut(&res.node_name) {
                view.pending_snapshot_num += 1;
                view.pending_snapshot_size += res.required_storage as i64;
            }
        }

        let mut ranked: Vec<NodeView> = state
            .node_views
            .values_mut()
            .map(|view| {
                view.calc_score();
                view.clone()
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.node_name.cmp(&b.node_name))
        });
        ranked
    }

    // =========================================================================
    // Event ingestion
    // =========================================================================

    /// Ingest a node inventory change: rebuild the node's view and evict
    /// reservations on that node whose objects the refreshed counters
    /// already include. Skipped when no pool on the node ever matched the
    /// pattern.
    pub fn on_node_event(&self, node: &StorageNode) {
        let matches_pool = node
            .spec
            .volume_groups
            .iter()
            .any(|vg| self.pattern.is_match(&vg.name));

        let mut state = self.state.lock();
        if !matches_pool && !state.node_views.contains_key(node.name()) {
            return;
        }

        let name = node.name().to_string();
        state
            .node_views
            .insert(name.clone(), NodeView::from_node(node, &self.pattern));
        state.node_labels.insert(
            name.clone(),
            node.metadata.labels.clone().unwrap_or_default(),
        );

        state
            .pending_volumes
            .retain(|_, res| !(res.node_name == name && res.is_created));
        state
            .pending_snapshots
            .retain(|_, res| !(res.node_name == name && res.is_created));

        debug!(node = %name, "refreshed node view");
    }

    /// Ingest a volume change: Pending volumes re-enter the reservation
    /// cache (resync after restart), post-creation states mark the
    /// reservation for eviction on the next inventory refresh.
    pub fn on_volume_event(&self, vol: &Volume) {
        if vol.spec.vg_pattern != self.pattern_str {
            return;
        }

        let mut state = self.state.lock();
        match vol.state() {
            VolumeState::Pending => {
                state
                    .pending_volumes
                    .entry(vol.name().to_string())
                    .or_insert_with(|| {
                        PendingReservation::new(
                            vol.name(),
                            &vol.spec.owner_node_id,
                            vol.spec.capacity,
                        )
                    });
            }
            VolumeState::Created | VolumeState::Cloning | VolumeState::Ready => {
                if let Some(res) = state.pending_volumes.get_mut(vol.name()) {
                    res.is_created = true;
                }
            }
            // Failed volumes keep their reservation; whether the space is
            // actually consumed depends on how far the ladder got, and the
            // next inventory refresh settles it.
            VolumeState::Failed => {}
        }
    }

    /// Ingest a snapshot change, mirroring the volume handling
    pub fn on_snapshot_event(&self, snap: &Snapshot) {
        let relevant = snap.spec.vg_pattern == self.pattern_str
            || self.pattern.is_match(&snap.spec.vol_group);
        if !relevant {
            return;
        }

        let mut state = self.state.lock();
        match snap.state() {
            VolumeState::Pending => {
                state
                    .pending_snapshots
                    .entry(snap.name().to_string())
                    .or_insert_with(|| {
                        PendingReservation::new(
                            snap.name(),
                            &snap.spec.owner_node_id,
                            snap.spec.snap_size,
                        )
                    });
            }
            VolumeState::Ready => {
                if let Some(res) = state.pending_snapshots.get_mut(snap.name()) {
                    res.is_created = true;
                }
            }
            _ => {}
        }
    }

    /// Full resync: replay one update per known object
    pub fn resync(&self, nodes: &[StorageNode], volumes: &[Volume], snapshots: &[Snapshot]) {
        for node in nodes {
            self.on_node_event(node);
        }
        for vol in volumes {
            self.on_volume_event(vol);
        }
        for snap in snapshots {
            self.on_snapshot_event(snap);
        }
    }

    #[cfg(test)]
    fn pending_volume_count(&self) -> usize {
        self.state.lock().pending_volumes.len()
    }
}

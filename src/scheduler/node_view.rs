//! Derived per-node capacity view
//!
//! Rebuilt from the node inventory on every node event; the pending counters
//! are transient and recomputed from the reservation cache on every
//! scheduling call.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::crd::StorageNode;

/// One gibibyte
pub const GIB: i64 = 1 << 30;

/// Per-item score penalty. Large relative to typical volume sizes so that a
/// node crowded with many small volumes loses to an emptier node even when
/// raw free space is comparable.
pub const ITEM_PENALTY: i64 = 100 * GIB;

// =============================================================================
// Node View
// =============================================================================

/// Aggregated capacity of one node's pattern-matching volume groups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeView {
    pub node_name: String,
    /// Logical volumes across matching groups
    pub volume_num: i64,
    /// Snapshots across matching groups
    pub snapshot_num: i64,
    /// Total size of matching groups in bytes
    pub total_size: i64,
    /// Total free capacity of matching groups in bytes
    pub total_free: i64,
    /// Free capacity of the single largest matching group. A volume must fit
    /// in one group, not the group sum.
    pub max_free: i64,

    // Transient, recomputed from the reservation cache on every call
    pub pending_volume_num: i64,
    pub pending_volume_size: i64,
    pub pending_snapshot_num: i64,
    pub pending_snapshot_size: i64,
    pub score: i64,
}

impl NodeView {
    /// Build the view from a node's inventory, aggregating only the volume
    /// groups matching the scheduler's pattern.
    pub fn from_node(node: &StorageNode, pattern: &Regex) -> Self {
        let mut view = NodeView {
            node_name: node.name().to_string(),
            ..Default::default()
        };

        for vg in &node.spec.volume_groups {
            if !pattern.is_match(&vg.name) {
                continue;
            }
            view.volume_num += i64::from(vg.lv_count);
            view.snapshot_num += i64::from(vg.snap_count);
            view.total_size += vg.size as i64;
            view.total_free += vg.free as i64;
            view.max_free = view.max_free.max(vg.free as i64);
        }

        view
    }

    /// Clear the transient pending counters before refolding the cache
    pub fn clear_pending(&mut self) {
        self.pending_volume_num = 0;
        self.pending_volume_size = 0;
        self.pending_snapshot_num = 0;
        self.pending_snapshot_size = 0;
        self.score = 0;
    }

    /// Recompute the node score: free minus used, minus capacity already
    /// promised to in-flight objects, minus a fixed penalty per existing and
    /// pending item.
    pub fn calc_score(&mut self) {
        let used = self.total_size - self.total_free;
        let items = self.volume_num
            + self.snapshot_num
            + self.pending_volume_num
            + self.pending_snapshot_num;
        self.score = (self.total_free - used)
            - self.pending_volume_size
            - self.pending_snapshot_size
            - ITEM_PENALTY * items;
    }
}

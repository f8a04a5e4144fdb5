//! Pending reservation cache entries
//!
//! A reservation is created when the scheduler picks a node and lives until
//! that node's inventory refresh reflects the real counters. The cache is
//! process-lifetime only: losing it on restart trades a window of optimistic
//! over-scheduling for not having to persist scheduler internals.

use serde::{Deserialize, Serialize};

/// Capacity promised to an in-flight volume or snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReservation {
    /// Object name
    pub name: String,
    /// Node the capacity was reserved on
    pub node_name: String,
    /// Reserved bytes
    pub required_storage: u64,
    /// Volume group, once the owning node picked one
    #[serde(default)]
    pub vg_name: String,
    /// Set once the observed status reached a post-creation state; the next
    /// inventory refresh for the node then evicts the entry, because the real
    /// counters already include it.
    pub is_created: bool,
}

impl PendingReservation {
    pub fn new(name: &str, node_name: &str, required_storage: u64) -> Self {
        Self {
            name: name.to_string(),
            node_name: node_name.to_string(),
            required_storage,
            vg_name: String::new(),
            is_created: false,
        }
    }
}

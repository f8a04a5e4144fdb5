//! Capacity-aware volume placement
//!
//! Tracks per-node free capacity derived from node inventory objects, scores
//! nodes per volume-group pattern, and hands out placements with optimistic
//! in-memory reservations so concurrent requests never overcommit a node.

mod manager;
mod node_view;
mod reservation;
mod scheduler;
mod topology;

pub use manager::SchedulerManager;
pub use node_view::{NodeView, GIB, ITEM_PENALTY};
pub use reservation::PendingReservation;
pub use scheduler::VolumeScheduler;
pub use topology::{TopologyRequirement, TopologySelector};

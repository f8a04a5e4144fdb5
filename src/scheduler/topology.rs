//! Topology constraint resolution
//!
//! Resolves an accessibility requirement into a candidate node-name set by
//! comparing node labels against constraint segments. Pure over the label
//! data the scheduler already caches, so it needs no cluster access.

use std::collections::{BTreeMap, HashMap, HashSet};

/// One alternative placement location: a node matches when every segment
/// equals the corresponding node label.
#[derive(Debug, Clone, Default)]
pub struct TopologySelector {
    pub segments: BTreeMap<String, String>,
}

/// Accessibility requirement for a volume
#[derive(Debug, Clone, Default)]
pub struct TopologyRequirement {
    /// Locations the caller prefers, tried first
    pub preferred: Vec<TopologySelector>,
    /// Locations the volume must be accessible from
    pub requisite: Vec<TopologySelector>,
}

impl TopologyRequirement {
    /// Resolve to the set of node names satisfying the requirement.
    /// Preferred wins over requisite; an empty requirement means no
    /// filtering and resolves to None.
    pub fn candidate_nodes(
        &self,
        node_labels: &HashMap<String, BTreeMap<String, String>>,
    ) -> Option<HashSet<String>> {
        let selectors = if !self.preferred.is_empty() {
            &self.preferred
        } else if !self.requisite.is_empty() {
            &self.requisite
        } else {
            return None;
        };

        let mut nodes = HashSet::new();
        for (name, labels) in node_labels {
            let matched = selectors.iter().any(|sel| {
                sel.segments
                    .iter()
                    .all(|(key, value)| labels.get(key) == Some(value))
            });
            if matched {
                nodes.insert(name.clone());
            }
        }

        Some(nodes)
    }
}

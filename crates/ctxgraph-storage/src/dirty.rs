//! Incremental save dirty detection.
//!
//! Compares the node hashes recorded at the last save with the current graph
//! to determine which node rows need writing back.

use std::collections::{HashMap, HashSet};

use ctxgraph_core::{ContextGraph, NodeId};

use crate::error::StorageError;
use crate::hash::hash_graph;

/// The set of nodes whose rows are stale.
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    /// Nodes added since the last save.
    pub new: HashSet<NodeId>,
    /// Nodes whose content or incoming links changed.
    pub modified: HashSet<NodeId>,
    /// Nodes present at the last save but gone from the graph.
    pub removed: HashSet<NodeId>,
}

impl DirtySet {
    /// Every node id a partial save must touch, sorted.
    pub fn needs_save(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .new
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.removed.len()
    }
}

/// Compute the dirty set by comparing `previous_hashes` against `graph`.
pub fn compute_dirty_nodes(
    graph: &ContextGraph,
    previous_hashes: &HashMap<NodeId, blake3::Hash>,
) -> Result<DirtySet, StorageError> {
    let current_hashes = hash_graph(graph)?;
    let mut dirty = DirtySet::default();

    for (&id, current) in &current_hashes {
        match previous_hashes.get(&id) {
            Some(previous) if previous == current => {}
            Some(_) => {
                dirty.modified.insert(id);
            }
            None => {
                dirty.new.insert(id);
            }
        }
    }
    for &id in previous_hashes.keys() {
        if !current_hashes.contains_key(&id) {
            dirty.removed.insert(id);
        }
    }

    Ok(dirty)
}

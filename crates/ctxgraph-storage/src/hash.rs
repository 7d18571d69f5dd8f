//! Deterministic content hashing for graph nodes using blake3.
//!
//! Hashes are derived state, never stored in the database. They drive the
//! incremental save path: a caller keeps the map from its last save and
//! [`crate::dirty::compute_dirty_nodes`] tells it which nodes to write back.
//!
//! # Levels
//!
//! - **Level 1**: node content hash (the persisted form of the node)
//! - **Level 2**: node hash with its incoming links, sorted by target slot
//!
//! Merge caches are skipped by serialization, so settling a loaded graph
//! never changes a hash.

use std::collections::HashMap;

use ctxgraph_core::{ContextGraph, GraphNode, LinkView, NodeId};

use crate::error::StorageError;

/// Computes a blake3 hash of a node's persisted content.
pub fn hash_node_schema(node: &GraphNode) -> Result<blake3::Hash, StorageError> {
    let bytes = serde_json::to_vec(node)?;
    Ok(blake3::hash(&bytes))
}

/// Computes a composite hash of a node and the links feeding it.
///
/// `incoming` may come in any order; links are sorted by target slot
/// before hashing. The link id is part of the hash so that re-wiring an
/// input with an identical link still marks the node dirty.
pub fn hash_node_with_links(
    node: &GraphNode,
    incoming: &[LinkView],
) -> Result<blake3::Hash, StorageError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(hash_node_schema(node)?.as_bytes());

    let mut sorted: Vec<&LinkView> = incoming.iter().collect();
    sorted.sort_by_key(|l| (l.target_slot, l.id));
    for link in sorted {
        hasher.update(&link.id.0.to_le_bytes());
        hasher.update(&link.origin.0.to_le_bytes());
        hasher.update(&(link.origin_slot as u64).to_le_bytes());
        hasher.update(&(link.target_slot as u64).to_le_bytes());
    }
    Ok(hasher.finalize())
}

/// Hashes every node of `graph` together with its incoming links.
pub fn hash_graph(graph: &ContextGraph) -> Result<HashMap<NodeId, blake3::Hash>, StorageError> {
    let links = graph.links();
    let mut hashes = HashMap::with_capacity(graph.node_count());
    for id in graph.node_ids() {
        let Some(node) = graph.node(id) else { continue };
        let incoming: Vec<LinkView> = links.iter().filter(|l| l.target == id).copied().collect();
        hashes.insert(id, hash_node_with_links(node, &incoming)?);
    }
    Ok(hashes)
}

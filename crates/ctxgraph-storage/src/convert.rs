//! Decompose/recompose conversions between ContextGraph and flat storage rows.
//!
//! [`decompose`] breaks a ContextGraph into a [`DecomposedGraph`] of node and
//! link rows. [`recompose`] rebuilds the arena from those rows, keeping every
//! `NodeId` and `LinkId` even when the stored ids have gaps. The result is
//! phase 1 of a restore: registries and links are back, merge nodes are not
//! yet settled.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::Directed;

use ctxgraph_core::{ContextGraph, GraphNode, Link, LinkView, NodeId};

use crate::error::StorageError;

/// All rows of one graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposedGraph {
    pub nodes: Vec<(NodeId, GraphNode)>,
    pub links: Vec<LinkView>,
}

/// Breaks a ContextGraph into node and link rows, both sorted by id.
pub fn decompose(graph: &ContextGraph) -> DecomposedGraph {
    let nodes = graph
        .node_ids()
        .into_iter()
        .filter_map(|id| graph.node(id).map(|n| (id, n.clone())))
        .collect();
    DecomposedGraph {
        nodes,
        links: graph.links(),
    }
}

/// Rebuilds a ContextGraph from rows.
///
/// Gaps in the id sequences are filled with placeholder nodes and self-loop
/// edges that are removed once every real row is in place, so each row lands
/// at its original index.
pub fn recompose(decomposed: DecomposedGraph) -> Result<ContextGraph, StorageError> {
    let mut arena = StableGraph::<GraphNode, Link, Directed, u32>::new();

    let nodes: BTreeMap<u32, GraphNode> = decomposed
        .nodes
        .into_iter()
        .map(|(id, node)| (id.0, node))
        .collect();
    let Some((&max_node, _)) = nodes.last_key_value() else {
        if !decomposed.links.is_empty() {
            return Err(StorageError::ReconstructionError {
                reason: "links stored for a graph without nodes".into(),
            });
        }
        return Ok(ContextGraph::from_parts(arena));
    };

    let mut node_gaps = Vec::new();
    let mut nodes = nodes;
    for i in 0..=max_node {
        match nodes.remove(&i) {
            Some(node) => {
                arena.add_node(node);
            }
            None => {
                arena.add_node(GraphNode::PassThrough);
                node_gaps.push(i);
            }
        }
    }
    let present: BTreeSet<u32> = (0..=max_node).filter(|i| !node_gaps.contains(i)).collect();

    let links: BTreeMap<u32, LinkView> = decomposed
        .links
        .into_iter()
        .map(|l| (l.id.0, l))
        .collect();
    let anchor = NodeIndex::<u32>::new(*present.iter().next().unwrap_or(&0) as usize);

    if let Some((&max_link, _)) = links.last_key_value() {
        let mut link_gaps = Vec::new();
        for i in 0..=max_link {
            match links.get(&i) {
                Some(link) => {
                    for endpoint in [link.origin, link.target] {
                        if !present.contains(&endpoint.0) {
                            return Err(StorageError::ReconstructionError {
                                reason: format!("link {} references missing node {}", link.id, endpoint),
                            });
                        }
                    }
                    arena.add_edge(
                        NodeIndex::new(link.origin.0 as usize),
                        NodeIndex::new(link.target.0 as usize),
                        Link {
                            origin_slot: link.origin_slot,
                            target_slot: link.target_slot,
                        },
                    );
                }
                None => {
                    arena.add_edge(anchor, anchor, Link { origin_slot: 0, target_slot: 0 });
                    link_gaps.push(i);
                }
            }
        }
        for &gap in link_gaps.iter().rev() {
            arena.remove_edge(EdgeIndex::<u32>::new(gap as usize));
        }
    }

    for &gap in node_gaps.iter().rev() {
        arena.remove_node(NodeIndex::<u32>::new(gap as usize));
    }

    Ok(ContextGraph::from_parts(arena))
}

/// Keeps only the rows a partial save touches: the listed nodes and the
/// links feeding them.
pub fn select(decomposed: &DecomposedGraph, nodes: &[NodeId]) -> DecomposedGraph {
    let wanted: BTreeSet<NodeId> = nodes.iter().copied().collect();
    DecomposedGraph {
        nodes: decomposed
            .nodes
            .iter()
            .filter(|(id, _)| wanted.contains(id))
            .cloned()
            .collect(),
        links: decomposed
            .links
            .iter()
            .filter(|l| wanted.contains(&l.target))
            .copied()
            .collect(),
    }
}

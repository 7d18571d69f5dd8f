//! In-memory implementation of [`GraphStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and for sessions that
//! never touch disk. Nodes pass through the same serialized form the SQLite
//! backend stores, so a merge node comes back unsettled from either backend.

use std::collections::{BTreeMap, BTreeSet};

use ctxgraph_core::{ContextGraph, GraphNode, LinkId, LinkView, NodeId};

use crate::convert::{decompose, recompose, DecomposedGraph};
use crate::error::StorageError;
use crate::traits::GraphStore;
use crate::types::{GraphId, GraphSummary};

/// Rows stored for a single graph.
#[derive(Debug, Clone, Default)]
struct StoredGraph {
    name: String,
    nodes: BTreeMap<NodeId, GraphNode>,
    links: BTreeMap<LinkId, LinkView>,
}

impl StoredGraph {
    fn to_decomposed(&self) -> DecomposedGraph {
        DecomposedGraph {
            nodes: self.nodes.iter().map(|(&id, n)| (id, n.clone())).collect(),
            links: self.links.values().copied().collect(),
        }
    }

    /// Drops every link touching `node`.
    fn unlink(&mut self, node: NodeId) {
        self.links.retain(|_, l| l.origin != node && l.target != node);
    }
}

/// Round-trips a node through JSON so only persisted state survives.
fn persisted(node: &GraphNode) -> Result<GraphNode, StorageError> {
    Ok(serde_json::from_value(serde_json::to_value(node)?)?)
}

/// In-memory storage backend.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    graphs: BTreeMap<i64, StoredGraph>,
    next_id: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            graphs: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn stored(&self, id: GraphId) -> Result<&StoredGraph, StorageError> {
        self.graphs.get(&id.0).ok_or(StorageError::GraphNotFound(id.0))
    }

    fn stored_mut(&mut self, id: GraphId) -> Result<&mut StoredGraph, StorageError> {
        self.graphs
            .get_mut(&id.0)
            .ok_or(StorageError::GraphNotFound(id.0))
    }
}

impl GraphStore for InMemoryStore {
    fn create_graph(&mut self, name: &str) -> Result<GraphId, StorageError> {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.graphs.insert(
            id,
            StoredGraph {
                name: name.to_string(),
                ..StoredGraph::default()
            },
        );
        Ok(GraphId(id))
    }

    fn load_graph(&self, id: GraphId) -> Result<ContextGraph, StorageError> {
        let stored = self.stored(id)?;
        let mut graph = recompose(stored.to_decomposed())?;
        graph.settle()?;
        tracing::debug!(graph = %id, nodes = graph.node_count(), "loaded graph");
        Ok(graph)
    }

    fn delete_graph(&mut self, id: GraphId) -> Result<(), StorageError> {
        self.graphs
            .remove(&id.0)
            .map(|_| ())
            .ok_or(StorageError::GraphNotFound(id.0))
    }

    fn list_graphs(&self) -> Result<Vec<GraphSummary>, StorageError> {
        Ok(self
            .graphs
            .iter()
            .map(|(&id, g)| GraphSummary {
                id: GraphId(id),
                name: g.name.clone(),
                nodes: g.nodes.len(),
                links: g.links.len(),
            })
            .collect())
    }

    fn save_graph(&mut self, id: GraphId, graph: &ContextGraph) -> Result<(), StorageError> {
        let decomposed = decompose(graph);
        let mut nodes = BTreeMap::new();
        for (node_id, node) in &decomposed.nodes {
            nodes.insert(*node_id, persisted(node)?);
        }
        let stored = self.stored_mut(id)?;
        stored.nodes = nodes;
        stored.links = decomposed.links.iter().map(|l| (l.id, *l)).collect();
        tracing::debug!(graph = %id, nodes = stored.nodes.len(), links = stored.links.len(), "saved graph");
        Ok(())
    }

    fn save_nodes(
        &mut self,
        id: GraphId,
        graph: &ContextGraph,
        nodes: &[NodeId],
    ) -> Result<(), StorageError> {
        let decomposed = decompose(graph);
        let wanted: BTreeSet<NodeId> = nodes.iter().copied().collect();
        let stored = self.stored_mut(id)?;

        for &node in &wanted {
            if graph.node(node).is_none() {
                stored.nodes.remove(&node);
                stored.unlink(node);
            }
        }
        for (node_id, node) in decomposed.nodes.iter().filter(|(n, _)| wanted.contains(n)) {
            stored.nodes.insert(*node_id, persisted(node)?);
        }
        stored.links.retain(|_, l| !wanted.contains(&l.target));
        for link in decomposed.links.iter().filter(|l| wanted.contains(&l.target)) {
            stored.links.insert(link.id, *link);
        }

        tracing::debug!(graph = %id, nodes = wanted.len(), "saved nodes");
        Ok(())
    }

    fn get_node(&self, id: GraphId, node: NodeId) -> Result<GraphNode, StorageError> {
        self.stored(id)?
            .nodes
            .get(&node)
            .cloned()
            .ok_or(StorageError::NodeNotFound {
                graph: id.0,
                node: node.0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_list_delete() {
        let mut store = InMemoryStore::new();
        let a = store.create_graph("alpha").unwrap();
        let b = store.create_graph("beta").unwrap();
        assert_ne!(a, b);

        let names: Vec<String> = store.list_graphs().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        store.delete_graph(a).unwrap();
        assert_eq!(store.list_graphs().unwrap().len(), 1);
        assert!(matches!(
            store.delete_graph(a),
            Err(StorageError::GraphNotFound(_))
        ));
    }

    #[test]
    fn missing_node_is_reported() {
        let mut store = InMemoryStore::new();
        let id = store.create_graph("empty").unwrap();
        let err = store.get_node(id, NodeId(3)).unwrap_err();
        assert!(matches!(err, StorageError::NodeNotFound { node: 3, .. }));
    }

    #[test]
    fn stored_merge_is_unsettled() {
        let mut store = InMemoryStore::new();
        let id = store.create_graph("merge").unwrap();
        let mut graph = ContextGraph::new();
        let m = graph.add_merge();
        store.save_graph(id, &graph).unwrap();

        match store.get_node(id, m).unwrap() {
            GraphNode::Merge(merge) => assert!(!merge.is_settled()),
            other => panic!("expected a merge node, got {other:?}"),
        }
        assert!(store.load_graph(id).unwrap().is_settled());
    }
}

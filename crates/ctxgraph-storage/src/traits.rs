//! The [`GraphStore`] trait defining the storage contract for context graphs.
//!
//! Two-layer API design:
//! - **Bulk** methods (`save_graph`, `load_graph`) write or rebuild a whole
//!   graph.
//! - **Incremental** methods (`save_nodes`, `get_node`, `get_node_fields`)
//!   touch single node rows, driven by [`crate::dirty::DirtySet`].
//!
//! Both backends implement this trait and are swappable.

use ctxgraph_core::{ContextGraph, ContextNode, Field, GraphNode, NodeId};

use crate::error::StorageError;
use crate::types::{GraphId, GraphSummary};

/// The storage contract for context graphs.
///
/// The trait is synchronous; a store is owned by one caller at a time.
pub trait GraphStore {
    // -------------------------------------------------------------------
    // Graph-level operations
    // -------------------------------------------------------------------

    /// Creates a new empty graph with the given name.
    fn create_graph(&mut self, name: &str) -> Result<GraphId, StorageError>;

    /// Loads a stored graph and settles it.
    ///
    /// Node and link ids come back exactly as saved. Merge nodes are
    /// rebuilt from their sources, so the returned graph passes
    /// [`ContextGraph::validate`] whenever the saved one did.
    fn load_graph(&self, id: GraphId) -> Result<ContextGraph, StorageError>;

    /// Deletes a graph and all its rows.
    fn delete_graph(&mut self, id: GraphId) -> Result<(), StorageError>;

    /// Lists all stored graphs, ordered by id.
    fn list_graphs(&self) -> Result<Vec<GraphSummary>, StorageError>;

    // -------------------------------------------------------------------
    // Bulk and incremental saves
    // -------------------------------------------------------------------

    /// Replaces every stored row of graph `id` with the contents of `graph`.
    fn save_graph(&mut self, id: GraphId, graph: &ContextGraph) -> Result<(), StorageError>;

    /// Writes back only the listed nodes.
    ///
    /// Listed nodes present in `graph` are upserted together with the links
    /// feeding them; listed nodes absent from `graph` are deleted along with
    /// every link touching them.
    fn save_nodes(
        &mut self,
        id: GraphId,
        graph: &ContextGraph,
        nodes: &[NodeId],
    ) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Node queries
    // -------------------------------------------------------------------

    /// Retrieves a stored node row.
    fn get_node(&self, id: GraphId, node: NodeId) -> Result<GraphNode, StorageError>;

    /// Returns the stored field list of a relay or merge node, empty for
    /// other kinds.
    ///
    /// For merge nodes this is the list as of the last save.
    fn get_node_fields(&self, id: GraphId, node: NodeId) -> Result<Vec<Field>, StorageError> {
        let stored = self.get_node(id, node)?;
        Ok(stored
            .as_context()
            .map(|ctx| ctx.registry().list().to_vec())
            .unwrap_or_default())
    }

    /// Output labels of a stored relay or merge node, base output excluded.
    fn get_node_outputs(&self, id: GraphId, node: NodeId) -> Result<Vec<String>, StorageError> {
        Ok(self.get_node(id, node)?.output_names())
    }
}

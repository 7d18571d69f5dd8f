//! SQLite implementation of [`GraphStore`].
//!
//! [`SqliteStore`] persists context graphs in a SQLite database with WAL mode,
//! atomic transactions on every write, and automatic schema migrations.
//! Nodes are stored as JSON TEXT via serde_json; links are plain columns.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use ctxgraph_core::{ContextGraph, GraphNode, LinkId, LinkView, NodeId, NodeKind};

use crate::convert::{decompose, recompose, select, DecomposedGraph};
use crate::error::StorageError;
use crate::traits::GraphStore;
use crate::types::{GraphId, GraphSummary};

/// SQLite-backed implementation of [`GraphStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn assert_graph_exists(&self, id: GraphId) -> Result<(), StorageError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM graphs WHERE id = ?1)",
            params![id.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::GraphNotFound(id.0));
        }
        Ok(())
    }

    fn kind_to_str(kind: NodeKind) -> &'static str {
        match kind {
            NodeKind::Relay => "relay",
            NodeKind::Merge => "merge",
            NodeKind::PassThrough => "pass_through",
            NodeKind::Plain => "plain",
        }
    }

    /// Upserts node rows. An update keeps the row, so links pointing at the
    /// node survive.
    fn upsert_nodes(
        tx: &Transaction<'_>,
        graph_id: i64,
        nodes: &[(NodeId, GraphNode)],
    ) -> Result<(), StorageError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO nodes (graph_id, node_id, kind, node_json, output_names) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (graph_id, node_id) DO UPDATE SET kind = excluded.kind, node_json = excluded.node_json,
             output_names = excluded.output_names",
        )?;
        for (node_id, node) in nodes {
            let node_json = serde_json::to_string(node)?;
            stmt.execute(params![
                graph_id,
                node_id.0,
                Self::kind_to_str(node.kind()),
                node_json,
                node.output_names().join(",")
            ])?;
        }
        Ok(())
    }

    fn insert_links(
        tx: &Transaction<'_>,
        graph_id: i64,
        links: &[LinkView],
    ) -> Result<(), StorageError> {
        let mut stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO links (graph_id, link_id, origin_id, origin_slot, target_id, target_slot)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for link in links {
            stmt.execute(params![
                graph_id,
                link.id.0,
                link.origin.0,
                link.origin_slot as i64,
                link.target.0,
                link.target_slot as i64,
            ])?;
        }
        Ok(())
    }

    fn load_decomposed(&self, graph_id: i64) -> Result<DecomposedGraph, StorageError> {
        let nodes = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT node_id, node_json FROM nodes WHERE graph_id = ?1 ORDER BY node_id",
            )?;
            let rows = stmt.query_map(params![graph_id], |row| {
                let node_id: u32 = row.get(0)?;
                let node_json: String = row.get(1)?;
                Ok((node_id, node_json))
            })?;
            let mut result = Vec::new();
            for row in rows {
                let (node_id, node_json) = row?;
                let node: GraphNode = serde_json::from_str(&node_json)?;
                result.push((NodeId(node_id), node));
            }
            result
        };

        let links = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT link_id, origin_id, origin_slot, target_id, target_slot
                 FROM links WHERE graph_id = ?1 ORDER BY link_id",
            )?;
            let rows = stmt.query_map(params![graph_id], |row| {
                let link_id: u32 = row.get(0)?;
                let origin: u32 = row.get(1)?;
                let origin_slot: i64 = row.get(2)?;
                let target: u32 = row.get(3)?;
                let target_slot: i64 = row.get(4)?;
                Ok(LinkView {
                    id: LinkId(link_id),
                    origin: NodeId(origin),
                    origin_slot: origin_slot as usize,
                    target: NodeId(target),
                    target_slot: target_slot as usize,
                })
            })?;
            let mut result = Vec::new();
            for row in rows {
                result.push(row?);
            }
            result
        };

        Ok(DecomposedGraph { nodes, links })
    }
}

impl GraphStore for SqliteStore {
    fn create_graph(&mut self, name: &str) -> Result<GraphId, StorageError> {
        self.conn
            .execute("INSERT INTO graphs (name) VALUES (?1)", params![name])?;
        let id = GraphId(self.conn.last_insert_rowid());
        tracing::debug!(graph = %id, name, "created graph");
        Ok(id)
    }

    fn load_graph(&self, id: GraphId) -> Result<ContextGraph, StorageError> {
        self.assert_graph_exists(id)?;
        let decomposed = self.load_decomposed(id.0)?;
        let mut graph = recompose(decomposed)?;
        graph.settle()?;
        tracing::debug!(graph = %id, nodes = graph.node_count(), links = graph.link_count(), "loaded graph");
        Ok(graph)
    }

    fn delete_graph(&mut self, id: GraphId) -> Result<(), StorageError> {
        self.assert_graph_exists(id)?;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM links WHERE graph_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM nodes WHERE graph_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM graphs WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        Ok(())
    }

    fn list_graphs(&self) -> Result<Vec<GraphSummary>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT g.id, g.name,
                    (SELECT COUNT(*) FROM nodes n WHERE n.graph_id = g.id),
                    (SELECT COUNT(*) FROM links l WHERE l.graph_id = g.id)
             FROM graphs g ORDER BY g.id",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let nodes: i64 = row.get(2)?;
            let links: i64 = row.get(3)?;
            Ok(GraphSummary {
                id: GraphId(id),
                name,
                nodes: nodes as usize,
                links: links as usize,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn save_graph(&mut self, id: GraphId, graph: &ContextGraph) -> Result<(), StorageError> {
        self.assert_graph_exists(id)?;
        let decomposed = decompose(graph);
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM links WHERE graph_id = ?1", params![id.0])?;
        tx.execute("DELETE FROM nodes WHERE graph_id = ?1", params![id.0])?;
        Self::upsert_nodes(&tx, id.0, &decomposed.nodes)?;
        Self::insert_links(&tx, id.0, &decomposed.links)?;
        tx.commit()?;
        tracing::debug!(
            graph = %id,
            nodes = decomposed.nodes.len(),
            links = decomposed.links.len(),
            "saved graph"
        );
        Ok(())
    }

    fn save_nodes(
        &mut self,
        id: GraphId,
        graph: &ContextGraph,
        nodes: &[NodeId],
    ) -> Result<(), StorageError> {
        self.assert_graph_exists(id)?;
        let part = select(&decompose(graph), nodes);
        let wanted: BTreeSet<NodeId> = nodes.iter().copied().collect();

        let tx = self.conn.transaction()?;
        {
            // Deleting a node row cascades to every link touching it.
            let mut delete_node =
                tx.prepare_cached("DELETE FROM nodes WHERE graph_id = ?1 AND node_id = ?2")?;
            let mut delete_inputs =
                tx.prepare_cached("DELETE FROM links WHERE graph_id = ?1 AND target_id = ?2")?;
            for node in &wanted {
                if graph.node(*node).is_none() {
                    delete_node.execute(params![id.0, node.0])?;
                } else {
                    delete_inputs.execute(params![id.0, node.0])?;
                }
            }
        }
        Self::upsert_nodes(&tx, id.0, &part.nodes)?;
        Self::insert_links(&tx, id.0, &part.links)?;
        tx.commit()?;

        tracing::debug!(graph = %id, nodes = wanted.len(), "saved nodes");
        Ok(())
    }

    fn get_node(&self, id: GraphId, node: NodeId) -> Result<GraphNode, StorageError> {
        let node_json: Option<String> = self
            .conn
            .query_row(
                "SELECT node_json FROM nodes WHERE graph_id = ?1 AND node_id = ?2",
                params![id.0, node.0],
                |row| row.get(0),
            )
            .optional()?;
        match node_json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StorageError::NodeNotFound {
                graph: id.0,
                node: node.0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxgraph_core::{OutputPort, TypeTag};

    #[test]
    fn create_and_list() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_graph("alpha").unwrap();
        let list = store.list_graphs().unwrap();
        assert_eq!(
            list,
            vec![GraphSummary {
                id,
                name: "alpha".into(),
                nodes: 0,
                links: 0
            }]
        );
    }

    #[test]
    fn unknown_graph_is_rejected() {
        let mut store = SqliteStore::in_memory().unwrap();
        let graph = ContextGraph::new();
        assert!(matches!(
            store.save_graph(GraphId(42), &graph),
            Err(StorageError::GraphNotFound(42))
        ));
        assert!(matches!(
            store.load_graph(GraphId(42)),
            Err(StorageError::GraphNotFound(42))
        ));
    }

    #[test]
    fn kind_column_is_queryable() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_graph("kinds").unwrap();
        let mut graph = ContextGraph::new();
        graph.add_relay();
        graph.add_merge();
        graph.add_relay();
        store.save_graph(id, &graph).unwrap();

        let relays: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM nodes WHERE graph_id = ?1 AND kind = 'relay'",
                params![id.0],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(relays, 2);
    }

    #[test]
    fn output_names_column_follows_saves() {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = store.create_graph("outputs").unwrap();
        let mut graph = ContextGraph::new();
        let seed = graph.add_plain(
            "Primitive",
            vec![],
            vec![OutputPort::new("SEED", TypeTag::new("INT"))],
        );
        let relay = graph.add_relay();
        graph.connect(seed, 0, relay, 1).unwrap();
        store.save_graph(id, &graph).unwrap();

        let column = |store: &SqliteStore| -> String {
            store
                .conn
                .query_row(
                    "SELECT output_names FROM nodes WHERE graph_id = ?1 AND node_id = ?2",
                    params![id.0, relay.0],
                    |row| row.get(0),
                )
                .unwrap()
        };
        assert_eq!(column(&store), "SEED");

        graph.rename_field(relay, 1, "noise_seed").unwrap();
        store.save_nodes(id, &graph, &[relay]).unwrap();
        assert_eq!(column(&store), "NOISE_SEED");
        assert_eq!(store.get_node_outputs(id, relay).unwrap(), vec!["NOISE_SEED"]);
    }
}

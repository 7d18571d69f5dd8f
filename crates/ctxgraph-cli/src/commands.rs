//! Subcommand implementations.
//!
//! Each command works against any [`GraphStore`] and writes its
//! machine-readable result as JSON to `out`, so the binary and the tests
//! share one code path.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use ctxgraph_core::{ContextGraph, CoreError, Field, NodeId, NodeKind, Violation};
use ctxgraph_storage::{GraphId, GraphStore, StorageError};

/// Exit code when `check` finds violations.
pub const EXIT_VIOLATIONS: i32 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid graph JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("graph rejected: {0}")]
    Core(#[from] CoreError),
}

impl CliError {
    /// 1 for a graph the engine rejects, 3 for I/O and storage failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Json(_) | CliError::Core(_) => 1,
            CliError::Io(_) | CliError::Storage(_) => 3,
        }
    }
}

#[derive(Debug, Serialize)]
struct Imported {
    graph: GraphId,
    nodes: usize,
    links: usize,
}

#[derive(Debug, Serialize)]
struct NodeReport {
    node: NodeId,
    kind: NodeKind,
    fields: Vec<Field>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    graph: GraphId,
    ok: bool,
    violations: Vec<Violation>,
}

/// Parses a serialized graph, settles it and stores it as a new graph.
pub fn import(
    store: &mut dyn GraphStore,
    json: &str,
    name: &str,
    out: &mut dyn Write,
) -> Result<GraphId, CliError> {
    let mut graph: ContextGraph = serde_json::from_str(json)?;
    graph.settle()?;
    let id = store.create_graph(name)?;
    store.save_graph(id, &graph)?;
    tracing::info!(graph = %id, name, nodes = graph.node_count(), "imported graph");

    let report = Imported {
        graph: id,
        nodes: graph.node_count(),
        links: graph.link_count(),
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(id)
}

/// Reads `path` and imports it, naming the graph after the file stem when
/// no name is given.
pub fn import_file(
    store: &mut dyn GraphStore,
    path: &Path,
    name: Option<&str>,
    out: &mut dyn Write,
) -> Result<GraphId, CliError> {
    let json = std::fs::read_to_string(path)?;
    let fallback = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "graph".to_string());
    import(store, &json, name.unwrap_or(&fallback), out)
}

pub fn export(store: &dyn GraphStore, id: GraphId, out: &mut dyn Write) -> Result<(), CliError> {
    let graph = store.load_graph(id)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&graph)?)?;
    Ok(())
}

pub fn list(store: &dyn GraphStore, out: &mut dyn Write) -> Result<(), CliError> {
    let graphs = store.list_graphs()?;
    writeln!(out, "{}", serde_json::to_string_pretty(&graphs)?)?;
    Ok(())
}

/// Prints one node's stored fields, or every node with its kind and fields.
pub fn inspect(
    store: &dyn GraphStore,
    id: GraphId,
    node: Option<NodeId>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if let Some(node) = node {
        let fields = store.get_node_fields(id, node)?;
        writeln!(out, "{}", serde_json::to_string_pretty(&fields)?)?;
        return Ok(());
    }

    let graph = store.load_graph(id)?;
    let mut reports = Vec::with_capacity(graph.node_count());
    for node in graph.node_ids() {
        let Some(kind) = graph.kind(node) else { continue };
        let fields = graph.fields(node).map(|f| f.to_vec()).unwrap_or_default();
        let outputs = graph.output_names(node).unwrap_or_default();
        reports.push(NodeReport {
            node,
            kind,
            fields,
            outputs,
        });
    }
    writeln!(out, "{}", serde_json::to_string_pretty(&reports)?)?;
    Ok(())
}

/// Loads and validates a stored graph. Returns whether it is clean.
pub fn check(store: &dyn GraphStore, id: GraphId, out: &mut dyn Write) -> Result<bool, CliError> {
    let graph = store.load_graph(id)?;
    let violations = graph.validate();
    if !violations.is_empty() {
        tracing::warn!(graph = %id, count = violations.len(), "graph has violations");
    }
    let report = CheckReport {
        graph: id,
        ok: violations.is_empty(),
        violations,
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(report.ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxgraph_core::{OutputPort, TypeTag};
    use ctxgraph_storage::InMemoryStore;

    fn sample_json() -> String {
        let mut graph = ContextGraph::new();
        let loader = graph.add_plain(
            "Loader",
            vec![],
            vec![OutputPort::new("MODEL", TypeTag::new("MODEL"))],
        );
        let a = graph.add_relay();
        graph.connect(loader, 0, a, 1).unwrap();
        let m = graph.add_merge();
        graph.connect(a, 0, m, 0).unwrap();
        serde_json::to_string(&graph).unwrap()
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn import_then_export() {
        let mut store = InMemoryStore::new();
        let mut out = Vec::new();
        let id = import(&mut store, &sample_json(), "sample", &mut out).unwrap();
        let report: serde_json::Value = serde_json::from_str(&text(out)).unwrap();
        assert_eq!(report["nodes"], 3);
        assert_eq!(report["links"], 2);

        let mut out = Vec::new();
        export(&store, id, &mut out).unwrap();
        let exported: ContextGraph = serde_json::from_str(&text(out)).unwrap();
        assert_eq!(exported.node_count(), 3);
        assert_eq!(exported.link_count(), 2);
    }

    #[test]
    fn invalid_json_exits_with_one() {
        let mut store = InMemoryStore::new();
        let err = import(&mut store, "{not json", "bad", &mut Vec::new()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(store.list_graphs().unwrap().is_empty());
    }

    #[test]
    fn inspect_single_node() {
        let mut store = InMemoryStore::new();
        let id = import(&mut store, &sample_json(), "sample", &mut Vec::new()).unwrap();

        let mut out = Vec::new();
        inspect(&store, id, Some(NodeId(1)), &mut out).unwrap();
        let fields: Vec<Field> = serde_json::from_str(&text(out)).unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["base_ctx", "+ model", "+"]);
    }

    #[test]
    fn inspect_whole_graph_lists_kinds() {
        let mut store = InMemoryStore::new();
        let id = import(&mut store, &sample_json(), "sample", &mut Vec::new()).unwrap();

        let mut out = Vec::new();
        inspect(&store, id, None, &mut out).unwrap();
        let report: serde_json::Value = serde_json::from_str(&text(out)).unwrap();
        let kinds: Vec<&str> = report
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["plain", "relay", "merge"]);
        assert!(report[0].get("outputs").is_none());
        assert_eq!(report[1]["outputs"], serde_json::json!(["MODEL"]));
        assert_eq!(report[2]["outputs"], serde_json::json!(["MODEL"]));
    }

    #[test]
    fn check_reports_clean_graph() {
        let mut store = InMemoryStore::new();
        let id = import(&mut store, &sample_json(), "sample", &mut Vec::new()).unwrap();
        let mut out = Vec::new();
        assert!(check(&store, id, &mut out).unwrap());
        let report: serde_json::Value = serde_json::from_str(&text(out)).unwrap();
        assert_eq!(report["ok"], true);
    }

    #[test]
    fn missing_graph_exits_with_three() {
        let store = InMemoryStore::new();
        let err = check(&store, GraphId(9), &mut Vec::new()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}

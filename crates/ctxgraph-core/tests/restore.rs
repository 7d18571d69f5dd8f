//! Snapshot and two-phase restore tests.

use ctxgraph_core::{ContextGraph, GraphNode, NodeId, OutputPort, TypeTag, Violation};

fn own(graph: &mut ContextGraph, relay: NodeId, name: &str) {
    let port = graph.add_plain(
        "Primitive",
        vec![],
        vec![OutputPort::new(name.to_uppercase(), TypeTag::new("INT"))],
    );
    let wildcard = graph.registry(relay).unwrap().wildcard_index().unwrap();
    graph.connect(port, 0, relay, wildcard).unwrap();
    graph.rename_field(relay, wildcard, name).unwrap();
}

/// s1(a, b) and s2(B, c) into a merge, the merge into a relay, and a
/// second merge downstream of the first.
fn build() -> (ContextGraph, NodeId, NodeId, NodeId) {
    let mut graph = ContextGraph::new();
    let s1 = graph.add_relay();
    own(&mut graph, s1, "a");
    own(&mut graph, s1, "b");
    let s2 = graph.add_relay();
    own(&mut graph, s2, "B");
    own(&mut graph, s2, "c");
    let m = graph.add_merge();
    graph.connect(s1, 0, m, 0).unwrap();
    graph.connect(s2, 0, m, 1).unwrap();
    let r = graph.add_relay();
    graph.connect(m, 0, r, 0).unwrap();
    let outer = graph.add_merge();
    graph.connect(r, 0, outer, 0).unwrap();
    (graph, s1, m, outer)
}

#[test]
fn round_trip_then_settle_restores_merge_fields() {
    let (graph, _, m, outer) = build();
    let json = serde_json::to_string(&graph).unwrap();

    let mut restored: ContextGraph = serde_json::from_str(&json).unwrap();
    assert!(!restored.is_settled());
    assert_eq!(
        restored.validate(),
        vec![
            Violation::Unsettled { node: m },
            Violation::Unsettled { node: outer },
        ]
    );

    restored.settle().unwrap();
    assert!(restored.is_settled());
    assert!(restored.validate().is_empty());
    assert_eq!(restored.fields(m).unwrap(), graph.fields(m).unwrap());
    assert_eq!(restored.fields(outer).unwrap(), graph.fields(outer).unwrap());
    assert_eq!(restored.links(), graph.links());
}

#[test]
fn settled_graph_keeps_propagating() {
    let (graph, s1, m, outer) = build();
    let json = serde_json::to_string(&graph).unwrap();
    let mut restored: ContextGraph = serde_json::from_str(&json).unwrap();
    restored.settle().unwrap();

    own(&mut restored, s1, "d");
    let names: Vec<String> = restored
        .fields(outer)
        .unwrap()
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert_eq!(names, vec!["base_ctx", "a", "b", "d", "c", "+"]);
    assert_eq!(restored.merge(m).unwrap().cached_entries().len(), 7);
}

#[test]
fn relay_registry_and_upstream_are_persisted() {
    let (graph, _, m, _) = build();
    let json = serde_json::to_value(&graph).unwrap();
    let restored: ContextGraph = serde_json::from_value(json).unwrap();

    let relay = restored
        .node_ids()
        .into_iter()
        .find(|id| matches!(restored.node(*id), Some(GraphNode::Relay(r)) if r.upstream() == Some(m)))
        .expect("relay behind the merge");
    let names: Vec<&str> = restored
        .fields(relay)
        .unwrap()
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(names, vec!["base_ctx", "a", "b", "c", "+"]);
}

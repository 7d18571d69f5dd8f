//! Structural checks over a whole graph.
//!
//! [`ContextGraph::validate`] walks every node and link and reports each
//! broken invariant as a [`Violation`]. An empty list means the graph is
//! consistent: registries aligned with their ports, keys unique per node,
//! links within range and merge nodes in sync with their sources.

use std::collections::HashSet;

use serde::Serialize;

use crate::graph::ContextGraph;
use crate::id::{LinkId, NodeId};
use crate::naming;
use crate::node::GraphNode;
use crate::shadow;

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// Outputs do not pair 1:1 with typed fields.
    Misaligned { node: NodeId, fields: usize, outputs: usize },
    /// Index 0 is not the base-context field.
    MissingBaseContext { node: NodeId },
    /// The wildcard slot is missing or not last.
    WildcardNotLast { node: NodeId },
    /// Two fields share a case-insensitive key.
    DuplicateKey { node: NodeId, key: String },
    /// A link targets or leaves a slot the node does not have.
    LinkOutOfRange { link: LinkId, node: NodeId, slot: usize },
    /// A merge node's fields differ from a fresh traversal of its sources.
    MergeDrift {
        node: NodeId,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    /// A merge node's sources cannot be merged at all.
    MergeConflict { node: NodeId, message: String },
    /// A merge node has not been settled since it was restored.
    Unsettled { node: NodeId },
}

impl ContextGraph {
    /// Checks every node and link, returning all violations found.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        for id in self.node_ids() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if let Some(ctx) = node.as_context() {
                check_registry(id, ctx.registry(), &mut violations);
            }
            if let GraphNode::Merge(merge) = node {
                if !merge.is_settled() {
                    violations.push(Violation::Unsettled { node: id });
                    continue;
                }
                check_merge(self, id, &mut violations);
            }
        }
        for link in self.links() {
            let origin_ok = self
                .node(link.origin)
                .is_some_and(|n| link.origin_slot < n.output_count());
            if !origin_ok {
                violations.push(Violation::LinkOutOfRange {
                    link: link.id,
                    node: link.origin,
                    slot: link.origin_slot,
                });
            }
            let target_ok = self
                .node(link.target)
                .is_some_and(|n| link.target_slot < n.input_count());
            if !target_ok {
                violations.push(Violation::LinkOutOfRange {
                    link: link.id,
                    node: link.target,
                    slot: link.target_slot,
                });
            }
        }
        violations
    }
}

fn check_registry(
    id: NodeId,
    registry: &crate::registry::FieldRegistry,
    out: &mut Vec<Violation>,
) {
    if !registry.is_aligned() {
        out.push(Violation::Misaligned {
            node: id,
            fields: registry.typed_len(),
            outputs: registry.outputs().len(),
        });
    }
    let base_ok = registry
        .get(0)
        .is_some_and(|f| f.name == naming::BASE_CONTEXT_NAME && !f.is_wildcard());
    if !base_ok {
        out.push(Violation::MissingBaseContext { node: id });
    }
    if !registry.has_trailing_wildcard() || registry.wildcard_index() != Some(registry.len() - 1) {
        out.push(Violation::WildcardNotLast { node: id });
    }

    let mut seen = HashSet::new();
    for key in registry.keys() {
        if !seen.insert(key.clone()) {
            out.push(Violation::DuplicateKey { node: id, key });
        }
    }
}

fn check_merge(graph: &ContextGraph, id: NodeId, out: &mut Vec<Violation>) {
    let entries = match graph.shadow_entries(id) {
        Ok(entries) => entries,
        Err(err) => {
            out.push(Violation::MergeConflict {
                node: id,
                message: err.to_string(),
            });
            return;
        }
    };
    let expected = shadow::live_keys(&entries);
    let actual: Vec<String> = graph
        .registry(id)
        .map(|r| r.keys().into_iter().skip(1).collect())
        .unwrap_or_default();
    if expected != actual {
        out.push(Violation::MergeDrift {
            node: id,
            expected,
            actual,
        });
    }
}

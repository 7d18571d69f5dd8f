//! ContextGraph: the node arena and link table the engine runs against.
//!
//! [`ContextGraph`] stands in for the host editor runtime. It owns every
//! node in a `StableGraph` addressed by [`NodeId`], stores links as directed
//! edges carrying their slot indices, resolves upstream/downstream nodes
//! through transparent pass-through chains and delivers low-level slot
//! notifications to context nodes.
//!
//! # Propagation
//!
//! Propagation is synchronous and depth-first: a node mutates its registry,
//! remaps the links attached to it, then calls [`ContextGraph::emit`], which
//! runs every downstream handler (and their own propagation) to completion
//! before returning. Cycles are rejected at connection time, so recursion
//! depth is bounded by the longest context chain.
//!
//! # Restore
//!
//! A graph is restored in two phases: deserializing it restores every node's
//! own registry and the link table without notifications, then
//! [`ContextGraph::settle`] rebuilds every merge node's shadow list in
//! topological order.

use std::collections::HashSet;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::UpstreamEvent;
use crate::field::{Field, FieldInfo, InputPort, OutputPort, TypeTag};
use crate::id::{LinkId, NodeId};
use crate::node::{ContextNode, GraphNode, Link, MergeNode, NodeKind, PlainNode, RelayNode};
use crate::registry::{FieldRegistry, SlotRemap};
use crate::shadow::{self, ShadowEntry};

/// A link as seen from outside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkView {
    pub id: LinkId,
    pub origin: NodeId,
    pub origin_slot: usize,
    pub target: NodeId,
    pub target_slot: usize,
}

/// The host graph: node arena plus link table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextGraph {
    graph: StableGraph<GraphNode, Link, Directed, u32>,
}

impl ContextGraph {
    pub fn new() -> Self {
        ContextGraph {
            graph: StableGraph::new(),
        }
    }

    /// Wraps an already-built arena. Merge nodes stay unsettled until
    /// [`settle`](Self::settle) runs.
    pub fn from_parts(graph: StableGraph<GraphNode, Link, Directed, u32>) -> Self {
        ContextGraph { graph }
    }

    /// Read-only access to the underlying arena.
    pub fn inner(&self) -> &StableGraph<GraphNode, Link, Directed, u32> {
        &self.graph
    }

    // -----------------------------------------------------------------------
    // Node management
    // -----------------------------------------------------------------------

    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        NodeId::from(self.graph.add_node(node))
    }

    pub fn add_relay(&mut self) -> NodeId {
        self.add_node(GraphNode::Relay(RelayNode::new()))
    }

    pub fn add_merge(&mut self) -> NodeId {
        self.add_node(GraphNode::Merge(MergeNode::new()))
    }

    pub fn add_pass_through(&mut self) -> NodeId {
        self.add_node(GraphNode::PassThrough)
    }

    pub fn add_plain(
        &mut self,
        title: &str,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
    ) -> NodeId {
        self.add_node(GraphNode::Plain(PlainNode {
            title: title.to_string(),
            inputs,
            outputs,
        }))
    }

    /// Adds an unlinked copy of `id`. A relay or merge copy starts over
    /// from its base fields, base context plus the wildcard slot, because
    /// every other field exists only through links. Other kinds are copied
    /// as they are.
    pub fn clone_node(&mut self, id: NodeId) -> Result<NodeId, CoreError> {
        let copy = match self.node(id).ok_or(CoreError::NodeNotFound { id })? {
            GraphNode::Relay(_) => GraphNode::Relay(RelayNode::new()),
            GraphNode::Merge(_) => GraphNode::Merge(MergeNode::new()),
            other => other.clone(),
        };
        let clone = self.add_node(copy);
        tracing::debug!(source = %id, %clone, "node cloned");
        Ok(clone)
    }

    /// Removes a node after disconnecting every link attached to it, so
    /// downstream nodes see the usual disconnect notifications.
    pub fn remove_node(&mut self, id: NodeId) -> Result<GraphNode, CoreError> {
        let idx = self.index(id)?;
        let outgoing: Vec<EdgeIndex<u32>> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in outgoing {
            self.remove_link(LinkId::from(edge))?;
        }
        let incoming: Vec<EdgeIndex<u32>> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in incoming {
            self.remove_link(LinkId::from(edge))?;
        }
        self.graph
            .remove_node(idx)
            .ok_or(CoreError::NodeNotFound { id })
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.graph.node_weight(id.into())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.graph.node_weight_mut(id.into())
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(GraphNode::kind)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.graph.node_indices().map(NodeId::from).collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn index(&self, id: NodeId) -> Result<NodeIndex<u32>, CoreError> {
        let idx: NodeIndex<u32> = id.into();
        if self.graph.node_weight(idx).is_none() {
            return Err(CoreError::NodeNotFound { id });
        }
        Ok(idx)
    }

    pub fn relay(&self, id: NodeId) -> Result<&RelayNode, CoreError> {
        match self.node(id) {
            Some(GraphNode::Relay(n)) => Ok(n),
            Some(_) => Err(CoreError::NotAContextNode { id }),
            None => Err(CoreError::NodeNotFound { id }),
        }
    }

    pub(crate) fn relay_mut(&mut self, id: NodeId) -> Result<&mut RelayNode, CoreError> {
        match self.node_mut(id) {
            Some(GraphNode::Relay(n)) => Ok(n),
            Some(_) => Err(CoreError::NotAContextNode { id }),
            None => Err(CoreError::NodeNotFound { id }),
        }
    }

    pub fn merge(&self, id: NodeId) -> Result<&MergeNode, CoreError> {
        match self.node(id) {
            Some(GraphNode::Merge(n)) => Ok(n),
            Some(_) => Err(CoreError::NotAContextNode { id }),
            None => Err(CoreError::NodeNotFound { id }),
        }
    }

    pub(crate) fn merge_mut(&mut self, id: NodeId) -> Result<&mut MergeNode, CoreError> {
        match self.node_mut(id) {
            Some(GraphNode::Merge(n)) => Ok(n),
            Some(_) => Err(CoreError::NotAContextNode { id }),
            None => Err(CoreError::NodeNotFound { id }),
        }
    }

    /// The field registry of a relay or merge node.
    pub fn registry(&self, id: NodeId) -> Result<&FieldRegistry, CoreError> {
        match self.node(id) {
            Some(node) => node
                .as_context()
                .map(|n| n.registry())
                .ok_or(CoreError::NotAContextNode { id }),
            None => Err(CoreError::NodeNotFound { id }),
        }
    }

    pub(crate) fn registry_mut(&mut self, id: NodeId) -> Result<&mut FieldRegistry, CoreError> {
        match self.node_mut(id) {
            Some(node) => node
                .as_context_mut()
                .map(|n| n.registry_mut())
                .ok_or(CoreError::NotAContextNode { id }),
            None => Err(CoreError::NodeNotFound { id }),
        }
    }

    /// Ordered fields of a context node, wildcard slot included.
    pub fn fields(&self, id: NodeId) -> Result<&[Field], CoreError> {
        self.registry(id).map(FieldRegistry::list)
    }

    /// What a context node exposes downstream (wildcard slot excluded).
    pub fn provide_fields(&self, id: NodeId) -> Result<Vec<FieldInfo>, CoreError> {
        self.registry(id).map(FieldRegistry::provide_fields)
    }

    /// Output labels of a context node, base-context output excluded.
    pub fn output_names(&self, id: NodeId) -> Result<Vec<String>, CoreError> {
        self.registry(id).map(FieldRegistry::output_names)
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    pub fn link(&self, id: LinkId) -> Option<LinkView> {
        let idx: EdgeIndex<u32> = id.into();
        let (origin, target) = self.graph.edge_endpoints(idx)?;
        let link = self.graph.edge_weight(idx)?;
        Some(LinkView {
            id,
            origin: NodeId::from(origin),
            origin_slot: link.origin_slot,
            target: NodeId::from(target),
            target_slot: link.target_slot,
        })
    }

    /// Every link, ordered by id.
    pub fn links(&self) -> Vec<LinkView> {
        let mut links: Vec<LinkView> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.link(LinkId::from(e)))
            .collect();
        links.sort_by_key(|l| l.id);
        links
    }

    /// The link feeding input `slot` of `node`, if any.
    pub fn input_link(&self, node: NodeId, slot: usize) -> Option<LinkView> {
        let idx: NodeIndex<u32> = node.into();
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .find(|e| e.weight().target_slot == slot)
            .and_then(|e| self.link(LinkId::from(e.id())))
    }

    /// Links leaving output `slot` of `node`.
    pub fn output_links(&self, node: NodeId, slot: usize) -> Vec<LinkView> {
        let idx: NodeIndex<u32> = node.into();
        let mut links: Vec<LinkView> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().origin_slot == slot)
            .filter_map(|e| self.link(LinkId::from(e.id())))
            .collect();
        links.sort_by_key(|l| l.id);
        links
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// The output feeding input `slot` of `node`, chasing through
    /// pass-through nodes to the first non-pass-through origin.
    pub fn upstream_origin(&self, node: NodeId, slot: usize) -> Option<(NodeId, usize)> {
        let mut seen = HashSet::new();
        let mut link = self.input_link(node, slot)?;
        loop {
            let origin = self.node(link.origin)?;
            if !origin.is_pass_through() {
                return Some((link.origin, link.origin_slot));
            }
            if !seen.insert(link.origin) {
                return None;
            }
            link = self.input_link(link.origin, 0)?;
        }
    }

    /// The node ultimately feeding input `slot` of `node`, skipping
    /// pass-through nodes.
    pub fn resolve_upstream(&self, node: NodeId, slot: usize) -> Option<NodeId> {
        self.upstream_origin(node, slot).map(|(id, _)| id)
    }

    /// (node, input slot) pairs consuming output `slot` of `node`, looking
    /// through pass-through nodes.
    pub fn downstream_terminals(&self, node: NodeId, slot: usize) -> Vec<(NodeId, usize)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.collect_terminals(node, slot, &mut seen, &mut out);
        out
    }

    fn collect_terminals(
        &self,
        node: NodeId,
        slot: usize,
        seen: &mut HashSet<NodeId>,
        out: &mut Vec<(NodeId, usize)>,
    ) {
        for link in self.output_links(node, slot) {
            match self.node(link.target) {
                Some(GraphNode::PassThrough) => {
                    if seen.insert(link.target) {
                        self.collect_terminals(link.target, 0, seen, out);
                    }
                }
                Some(_) => out.push((link.target, link.target_slot)),
                None => {}
            }
        }
    }

    /// Nodes consuming the whole-context output (output 0) of `node`.
    pub fn resolve_downstream(&self, node: NodeId) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        for (id, _) in self.downstream_terminals(node, 0) {
            if !nodes.contains(&id) {
                nodes.push(id);
            }
        }
        nodes
    }

    /// Chases the link into `slot` until a concrete output type is found and
    /// returns that output's label and type.
    pub fn follow_until_type(&self, node: NodeId, slot: usize) -> Option<(String, TypeTag)> {
        let (origin, origin_slot) = self.upstream_origin(node, slot)?;
        let output = self.node(origin)?.output(origin_slot)?;
        if output.ty.is_wildcard() {
            return None;
        }
        Some((output.label, output.ty))
    }

    // -----------------------------------------------------------------------
    // Host edits
    // -----------------------------------------------------------------------

    /// Checks a proposed link without creating it.
    ///
    /// Rejects out-of-range slots, self links, links that would close a
    /// cycle, and links that would make one source reachable at two slots of
    /// a merge node (directly or through pass-through nodes). A link into a
    /// merge node whose new source could not be merged with the others fails
    /// with [`CoreError::ConflictingSchema`] before anything changes.
    pub fn can_connect(
        &self,
        origin: NodeId,
        origin_slot: usize,
        target: NodeId,
        target_slot: usize,
    ) -> Result<(), CoreError> {
        let origin_node = self.node(origin).ok_or(CoreError::NodeNotFound { id: origin })?;
        let target_node = self.node(target).ok_or(CoreError::NodeNotFound { id: target })?;
        if origin_slot >= origin_node.output_count() {
            return Err(CoreError::InvalidSlot {
                node: origin,
                slot: origin_slot,
            });
        }
        if target_slot >= target_node.input_count() {
            return Err(CoreError::InvalidSlot {
                node: target,
                slot: target_slot,
            });
        }

        let loop_error = |reason: String| {
            tracing::warn!(%origin, %target, slot = target_slot, %reason, "connection rejected");
            CoreError::LoopDetected {
                origin,
                target,
                slot: target_slot,
                reason,
            }
        };

        if origin == target {
            return Err(loop_error("a node cannot feed itself".into()));
        }
        if has_path_connecting(&self.graph, target.into(), origin.into(), None) {
            return Err(loop_error("the link would close a cycle".into()));
        }

        let merges: Vec<(NodeId, usize)> = match target_node {
            GraphNode::Merge(_) => vec![(target, target_slot)],
            GraphNode::PassThrough => self
                .downstream_terminals(target, 0)
                .into_iter()
                .filter(|(id, _)| self.kind(*id) == Some(NodeKind::Merge))
                .collect(),
            _ => Vec::new(),
        };
        if merges.is_empty() {
            return Ok(());
        }

        let resolved = if origin_node.is_pass_through() {
            self.resolve_upstream(origin, 0)
        } else {
            Some(origin)
        };
        let mut proposed = vec![origin];
        proposed.extend(resolved.filter(|&r| r != origin));

        for &(merge, slot) in &merges {
            let slots = self.merge(merge)?.slots();
            for other in (0..slots).filter(|&s| s != slot) {
                let mut reachable = Vec::new();
                if let Some(link) = self.input_link(merge, other) {
                    reachable.push(link.origin);
                }
                if let Some(source) = self.resolve_upstream(merge, other) {
                    reachable.push(source);
                }
                if let Some(dup) = proposed.iter().find(|p| reachable.contains(p)) {
                    return Err(loop_error(format!(
                        "node {dup} already feeds merge node {merge} at slot {other}"
                    )));
                }
            }
        }

        for (merge, slot) in merges {
            if let Err(err) = crate::merge::check_source(self, merge, slot, resolved) {
                tracing::warn!(%origin, %merge, slot, %err, "connection rejected");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Links `origin`'s output `origin_slot` to `target`'s input
    /// `target_slot`, replacing any link already on that input, then
    /// notifies the target.
    pub fn connect(
        &mut self,
        origin: NodeId,
        origin_slot: usize,
        target: NodeId,
        target_slot: usize,
    ) -> Result<LinkId, CoreError> {
        self.can_connect(origin, origin_slot, target, target_slot)?;

        if let Some(existing) = self.input_link(target, target_slot) {
            self.remove_link(existing.id)?;
        }

        let edge = self.graph.add_edge(
            origin.into(),
            target.into(),
            Link {
                origin_slot,
                target_slot,
            },
        );
        let link = LinkId::from(edge);
        tracing::debug!(%link, %origin, origin_slot, %target, target_slot, "link added");

        self.notify_slot_connected(target, target_slot)?;
        Ok(link)
    }

    /// Removes the link feeding input `slot` of `target`, if any.
    pub fn disconnect(&mut self, target: NodeId, slot: usize) -> Result<Option<LinkId>, CoreError> {
        self.index(target)?;
        match self.input_link(target, slot) {
            Some(link) => {
                self.remove_link(link.id)?;
                Ok(Some(link.id))
            }
            None => Ok(None),
        }
    }

    /// Removes a link, then notifies its target.
    pub fn remove_link(&mut self, id: LinkId) -> Result<(), CoreError> {
        let view = self.link(id).ok_or(CoreError::LinkNotFound { id })?;
        self.graph.remove_edge(id.into());
        tracing::debug!(link = %id, target = %view.target, slot = view.target_slot, "link removed");
        self.notify_slot_disconnected(view.target, view.target_slot)
    }

    fn notify_slot_connected(&mut self, node: NodeId, slot: usize) -> Result<(), CoreError> {
        match self.kind(node) {
            Some(NodeKind::Relay) => RelayNode::on_slot_connected(self, node, slot),
            Some(NodeKind::Merge) => MergeNode::on_slot_connected(self, node, slot),
            Some(NodeKind::PassThrough) => {
                for (terminal, terminal_slot) in self.downstream_terminals(node, 0) {
                    self.notify_slot_connected(terminal, terminal_slot)?;
                }
                Ok(())
            }
            Some(NodeKind::Plain) | None => Ok(()),
        }
    }

    fn notify_slot_disconnected(&mut self, node: NodeId, slot: usize) -> Result<(), CoreError> {
        match self.kind(node) {
            Some(NodeKind::Relay) => RelayNode::on_slot_disconnected(self, node, slot),
            Some(NodeKind::Merge) => MergeNode::on_slot_disconnected(self, node, slot),
            Some(NodeKind::PassThrough) => {
                for (terminal, terminal_slot) in self.downstream_terminals(node, 0) {
                    self.notify_slot_disconnected(terminal, terminal_slot)?;
                }
                Ok(())
            }
            Some(NodeKind::Plain) | None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // User edits on relay fields
    // -----------------------------------------------------------------------

    /// Renames an owned relay field.
    pub fn rename_field(&mut self, node: NodeId, index: usize, new_name: &str) -> Result<(), CoreError> {
        crate::relay::rename_owned_field(self, node, index, new_name)
    }

    /// Deletes an owned relay field.
    pub fn remove_field(&mut self, node: NodeId, index: usize) -> Result<(), CoreError> {
        crate::relay::remove_owned_field(self, node, index)
    }

    // -----------------------------------------------------------------------
    // Propagation plumbing
    // -----------------------------------------------------------------------

    /// Delivers `event` to every context node consuming the source's
    /// whole-context output. Relays only listen on slot 0; merge nodes on
    /// any source slot.
    pub(crate) fn emit(&mut self, event: UpstreamEvent) -> Result<(), CoreError> {
        let terminals = self.downstream_terminals(event.source, 0);
        tracing::trace!(source = %event.source, kind = ?event.kind, index = event.payload.index, receivers = terminals.len(), "propagating");
        for (node, slot) in terminals {
            match self.kind(node) {
                Some(NodeKind::Relay) if slot == 0 => RelayNode::on_upstream_event(self, node, &event)?,
                Some(NodeKind::Merge) => MergeNode::on_upstream_event(self, node, &event)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Moves the links attached to `node` after a registry mutation. Relay
    /// inputs follow their fields; merge inputs are source slots and stay.
    pub(crate) fn remap_links(&mut self, node: NodeId, remap: SlotRemap) {
        let idx: NodeIndex<u32> = node.into();
        let remap_inputs = self.kind(node) == Some(NodeKind::Relay);

        let outgoing: Vec<EdgeIndex<u32>> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in outgoing {
            let Some(link) = self.graph.edge_weight_mut(edge) else {
                continue;
            };
            match remap.apply(link.origin_slot) {
                Some(slot) => link.origin_slot = slot,
                None => {
                    self.graph.remove_edge(edge);
                }
            }
        }

        if !remap_inputs {
            return;
        }
        let incoming: Vec<EdgeIndex<u32>> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in incoming {
            let Some(link) = self.graph.edge_weight_mut(edge) else {
                continue;
            };
            match remap.apply(link.target_slot) {
                Some(slot) => link.target_slot = slot,
                None => {
                    self.graph.remove_edge(edge);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Restore
    // -----------------------------------------------------------------------

    /// Phase 2 of a restore: rebuilds every merge node's shadow list, in
    /// topological order, from its sources' restored fields.
    pub fn settle(&mut self) -> Result<(), CoreError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            let id = NodeId::from(cycle.node_id());
            CoreError::LoopDetected {
                origin: id,
                target: id,
                slot: 0,
                reason: "restored graph contains a cycle".into(),
            }
        })?;
        for idx in order {
            let id = NodeId::from(idx);
            if self.kind(id) == Some(NodeKind::Merge) {
                crate::merge::rebuild(self, id)?;
            }
        }
        Ok(())
    }

    /// True when no merge node is waiting for [`settle`](Self::settle).
    pub fn is_settled(&self) -> bool {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .all(|n| match n {
                GraphNode::Merge(m) => m.is_settled(),
                _ => true,
            })
    }

    /// A fresh full traversal of a merge node's sources.
    pub fn shadow_entries(&self, id: NodeId) -> Result<Vec<ShadowEntry>, CoreError> {
        crate::merge::collect(self, id)
    }

    /// The fields a full rebuild of merge node `id` would materialize.
    pub fn rebuild_shadow(&self, id: NodeId) -> Result<Vec<Field>, CoreError> {
        Ok(shadow::materialize(&self.shadow_entries(id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(graph: &mut ContextGraph) -> NodeId {
        graph.add_plain(
            "Loader",
            vec![],
            vec![
                OutputPort::new("MODEL", TypeTag::new("MODEL")),
                OutputPort::new("CLIP", TypeTag::new("CLIP")),
            ],
        )
    }

    #[test]
    fn resolve_upstream_skips_pass_through() {
        let mut graph = ContextGraph::new();
        let a = graph.add_relay();
        let r1 = graph.add_pass_through();
        let r2 = graph.add_pass_through();
        let b = graph.add_relay();
        graph.connect(a, 0, r1, 0).unwrap();
        graph.connect(r1, 0, r2, 0).unwrap();
        graph.connect(r2, 0, b, 0).unwrap();

        assert_eq!(graph.resolve_upstream(b, 0), Some(a));
        assert_eq!(graph.resolve_downstream(a), vec![b]);
        assert_eq!(graph.downstream_terminals(a, 0), vec![(b, 0)]);
    }

    #[test]
    fn follow_until_type_reads_concrete_output() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let r = graph.add_pass_through();
        let p = graph.add_plain("Sink", vec![InputPort::new("clip", TypeTag::new("CLIP"))], vec![]);
        graph.connect(l, 1, r, 0).unwrap();
        graph.connect(r, 0, p, 0).unwrap();
        assert_eq!(
            graph.follow_until_type(p, 0),
            Some(("CLIP".to_string(), TypeTag::new("CLIP")))
        );
    }

    #[test]
    fn connect_rejects_cycles_and_bad_slots() {
        let mut graph = ContextGraph::new();
        let a = graph.add_relay();
        let b = graph.add_relay();
        graph.connect(a, 0, b, 0).unwrap();

        let err = graph.connect(b, 0, a, 0).unwrap_err();
        assert!(matches!(err, CoreError::LoopDetected { .. }));
        let err = graph.connect(a, 0, a, 1).unwrap_err();
        assert!(matches!(err, CoreError::LoopDetected { .. }));
        let err = graph.connect(a, 5, b, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSlot { slot: 5, .. }));
        let err = graph.connect(NodeId(99), 0, b, 0).unwrap_err();
        assert!(matches!(err, CoreError::NodeNotFound { .. }));
    }

    #[test]
    fn connect_replaces_existing_input_link() {
        let mut graph = ContextGraph::new();
        let a = graph.add_relay();
        let b = graph.add_relay();
        let c = graph.add_relay();
        graph.connect(a, 0, c, 0).unwrap();
        graph.connect(b, 0, c, 0).unwrap();
        assert_eq!(graph.link_count(), 1);
        assert_eq!(graph.resolve_upstream(c, 0), Some(b));
    }

    #[test]
    fn cloned_context_nodes_start_from_base_fields() {
        let mut graph = ContextGraph::new();
        let l = loader(&mut graph);
        let a = graph.add_relay();
        graph.connect(l, 0, a, 1).unwrap();
        let b = graph.add_relay();
        graph.connect(a, 0, b, 0).unwrap();
        assert_eq!(graph.output_names(b).unwrap(), vec!["MODEL"]);

        let copy = graph.clone_node(b).unwrap();
        let names: Vec<&str> = graph.fields(copy).unwrap().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["base_ctx", "+"]);
        assert!(graph.relay(copy).unwrap().upstream().is_none());
        assert!(graph.output_names(copy).unwrap().is_empty());
        assert_eq!(graph.link_count(), 2);

        let m = graph.add_merge();
        graph.connect(a, 0, m, 0).unwrap();
        let merge_copy = graph.clone_node(m).unwrap();
        assert_eq!(graph.merge(merge_copy).unwrap().slots(), 1);
        assert_eq!(graph.fields(merge_copy).unwrap().len(), 2);

        let loader_copy = graph.clone_node(l).unwrap();
        assert_eq!(graph.node(loader_copy), graph.node(l));
        assert!(matches!(
            graph.clone_node(NodeId(99)),
            Err(CoreError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn disconnect_and_remove_node() {
        let mut graph = ContextGraph::new();
        let a = graph.add_relay();
        let b = graph.add_relay();
        graph.connect(a, 0, b, 0).unwrap();
        assert!(graph.disconnect(b, 0).unwrap().is_some());
        assert!(graph.disconnect(b, 0).unwrap().is_none());

        graph.connect(a, 0, b, 0).unwrap();
        graph.remove_node(a).unwrap();
        assert_eq!(graph.link_count(), 0);
        assert!(graph.node(a).is_none());
        assert!(matches!(
            graph.remove_link(LinkId(42)),
            Err(CoreError::LinkNotFound { .. })
        ));
    }
}

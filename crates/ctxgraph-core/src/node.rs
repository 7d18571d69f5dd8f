//! Node variants of the host graph.
//!
//! The node set is closed: [`GraphNode`] is a relay, a merge, a transparent
//! pass-through or a plain host node with fixed ports. Relay and merge nodes
//! implement [`ContextNode`], and the graph dispatches notifications to them
//! by variant tag.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;
use crate::event::UpstreamEvent;
use crate::field::{Field, FieldInfo, InputPort, OutputPort};
use crate::graph::ContextGraph;
use crate::id::NodeId;
use crate::registry::FieldRegistry;
use crate::shadow::ShadowEntry;

/// Static variant tag of a [`GraphNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Relay,
    Merge,
    PassThrough,
    Plain,
}

/// Capability shared by relay and merge nodes.
///
/// The handlers take the graph and the node's id rather than `&mut self`:
/// a handler mutates its own registry, then re-enters the graph to notify
/// downstream nodes, which may read this node's fields back.
pub trait ContextNode {
    fn registry(&self) -> &FieldRegistry;

    fn registry_mut(&mut self) -> &mut FieldRegistry;

    /// Typed fields exposed to downstream nodes.
    fn provide_fields(&self) -> Vec<FieldInfo> {
        self.registry().provide_fields()
    }

    /// Number of input slots a link may target.
    fn input_slots(&self) -> usize;

    /// Applies an upstream-change event from a source feeding this node.
    fn on_upstream_event(
        graph: &mut ContextGraph,
        id: NodeId,
        event: &UpstreamEvent,
    ) -> Result<(), CoreError>
    where
        Self: Sized;

    /// Low-level "input slot connected" notification from the host.
    fn on_slot_connected(graph: &mut ContextGraph, id: NodeId, slot: usize) -> Result<(), CoreError>
    where
        Self: Sized;

    /// Low-level "input slot disconnected" notification from the host.
    fn on_slot_disconnected(
        graph: &mut ContextGraph,
        id: NodeId,
        slot: usize,
    ) -> Result<(), CoreError>
    where
        Self: Sized;
}

/// Lifecycle state of a relay node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayState {
    /// No upstream context feeds slot 0.
    Idle,
    /// Fields are mirrored from this upstream node.
    Bound(NodeId),
}

/// A context node with one upstream source, mirrored by position, plus
/// owned trailing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayNode {
    pub(crate) registry: FieldRegistry,
    #[serde(default)]
    pub(crate) upstream: Option<NodeId>,
}

impl Default for RelayNode {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayNode {
    pub fn new() -> Self {
        RelayNode {
            registry: FieldRegistry::new(),
            upstream: None,
        }
    }

    /// Restores a relay from persisted fields.
    pub fn from_fields(fields: Vec<Field>, upstream: Option<NodeId>) -> Self {
        RelayNode {
            registry: FieldRegistry::from(fields),
            upstream,
        }
    }

    pub fn state(&self) -> RelayState {
        match self.upstream {
            Some(id) => RelayState::Bound(id),
            None => RelayState::Idle,
        }
    }

    pub fn upstream(&self) -> Option<NodeId> {
        self.upstream
    }
}

/// A context node fed by any number of sources whose fields are merged into
/// one deduplicated shadow list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeNode {
    pub(crate) registry: FieldRegistry,
    /// Source slots; the last one is always free ("add another source").
    #[serde(deserialize_with = "at_least_one_slot")]
    pub(crate) slots: usize,
    /// Traversal as of the last completed handler.
    #[serde(skip)]
    pub(crate) cache: Vec<ShadowEntry>,
    /// False between phase 1 of a restore and [`ContextGraph::settle`].
    #[serde(skip)]
    pub(crate) settled: bool,
}

impl Default for MergeNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeNode {
    pub fn new() -> Self {
        MergeNode {
            registry: FieldRegistry::new(),
            slots: 1,
            cache: Vec::new(),
            settled: true,
        }
    }

    /// Restores a merge node from persisted fields. The node is unsettled
    /// until its shadow list is rebuilt.
    pub fn from_fields(fields: Vec<Field>, slots: usize) -> Self {
        MergeNode {
            registry: FieldRegistry::from(fields),
            slots: slots.max(1),
            cache: Vec::new(),
            settled: false,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// The cached traversal the next incremental update will treat as "pre".
    pub fn cached_entries(&self) -> &[ShadowEntry] {
        &self.cache
    }
}

fn at_least_one_slot<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    Ok(usize::deserialize(deserializer)?.max(1))
}

/// A host node with fixed ports, e.g. a model loader or a sampler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainNode {
    pub title: String,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
}

/// Directed link from an output slot to an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub origin_slot: usize,
    pub target_slot: usize,
}

/// A node of the host graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphNode {
    Relay(RelayNode),
    Merge(MergeNode),
    /// Transparent reroute: one input, one output.
    PassThrough,
    Plain(PlainNode),
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            GraphNode::Relay(_) => NodeKind::Relay,
            GraphNode::Merge(_) => NodeKind::Merge,
            GraphNode::PassThrough => NodeKind::PassThrough,
            GraphNode::Plain(_) => NodeKind::Plain,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, GraphNode::PassThrough)
    }

    pub fn as_context(&self) -> Option<&dyn ContextNode> {
        match self {
            GraphNode::Relay(n) => Some(n),
            GraphNode::Merge(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_context_mut(&mut self) -> Option<&mut dyn ContextNode> {
        match self {
            GraphNode::Relay(n) => Some(n),
            GraphNode::Merge(n) => Some(n),
            _ => None,
        }
    }

    pub fn input_count(&self) -> usize {
        match self {
            GraphNode::Relay(n) => n.input_slots(),
            GraphNode::Merge(n) => n.input_slots(),
            GraphNode::PassThrough => 1,
            GraphNode::Plain(n) => n.inputs.len(),
        }
    }

    pub fn output_count(&self) -> usize {
        match self {
            GraphNode::Relay(n) => n.registry.outputs().len(),
            GraphNode::Merge(n) => n.registry.outputs().len(),
            GraphNode::PassThrough => 1,
            GraphNode::Plain(n) => n.outputs.len(),
        }
    }

    /// Output labels after the base-context output of a relay or merge
    /// node. Empty for other kinds.
    pub fn output_names(&self) -> Vec<String> {
        self.as_context()
            .map(|ctx| ctx.registry().output_names())
            .unwrap_or_default()
    }

    /// The output port at `slot`. Pass-through outputs are untyped.
    pub fn output(&self, slot: usize) -> Option<OutputPort> {
        match self {
            GraphNode::Relay(n) => n.registry.outputs().get(slot).cloned(),
            GraphNode::Merge(n) => n.registry.outputs().get(slot).cloned(),
            GraphNode::PassThrough => (slot == 0).then(|| OutputPort::new("*", crate::field::TypeTag::wildcard())),
            GraphNode::Plain(n) => n.outputs.get(slot).cloned(),
        }
    }
}

//! Core error types for ctxgraph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of field propagation, shadow-list derivation and the host
//! graph arena.

use thiserror::Error;

use crate::field::TypeTag;
use crate::id::{LinkId, NodeId};

/// Errors produced by the ctxgraph-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Two upstream sources expose the same case-insensitive field name with
    /// different types. The rebuild that found it commits nothing.
    #[error("conflicting schema for '{key}': {existing} != {incoming}")]
    ConflictingSchema {
        key: String,
        existing: TypeTag,
        incoming: TypeTag,
    },

    /// Attempted to delete a mirrored (non-owned) field.
    #[error("field {index} on node {node} is not removable")]
    NotRemovable { node: NodeId, index: usize },

    /// Attempted to rename a mirrored (non-owned) field.
    #[error("field {index} on node {node} is not owned and cannot be renamed")]
    NotOwned { node: NodeId, index: usize },

    /// A proposed connection would create a cycle or feed the same source
    /// into a merge node at two different slots.
    #[error("connecting node {origin} into node {target} slot {slot} would create a loop: {reason}")]
    LoopDetected {
        origin: NodeId,
        target: NodeId,
        slot: usize,
        reason: String,
    },

    /// An incremental merge update referenced a source field absent from the
    /// cached or fresh traversal. The shadow cache is stale.
    #[error("missing traceback on merge node {node}: source {source_node} field {index} not found in {list} traversal")]
    MissingTraceback {
        node: NodeId,
        source_node: NodeId,
        index: usize,
        list: &'static str,
    },

    /// After an incremental update a merge node's fields no longer match the
    /// traversal they were derived from.
    #[error("merge node {node} drifted from its sources: expected {expected:?}, found {actual:?}")]
    ShadowDrift {
        node: NodeId,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// A node id was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A link id was not found in the graph.
    #[error("link not found: LinkId({id})", id = id.0)]
    LinkNotFound { id: LinkId },

    /// A slot index is out of range for the node.
    #[error("invalid slot {slot} on node {node}")]
    InvalidSlot { node: NodeId, slot: usize },

    /// An operation that needs a relay or merge node was given another kind.
    #[error("node {id} is not a context node")]
    NotAContextNode { id: NodeId },
}

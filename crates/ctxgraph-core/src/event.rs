//! Upstream-change events exchanged between context nodes.
//!
//! Every mutation of a node's externally visible field set produces exactly
//! one [`UpstreamEvent`], delivered to every node consuming the mutated
//! node's whole-context output.

use serde::{Deserialize, Serialize};

use crate::field::TypeTag;
use crate::id::NodeId;

/// What happened to the source field at `payload.index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A field appeared at `index`.
    Connect,
    /// The field at `index` disappeared.
    Disconnect,
    /// The field at `from` now sits at `index`.
    Move,
    /// The field at `index` was renamed to `name`.
    Update,
}

/// Enough information for a receiver to reproduce the edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub index: usize,
    /// Display name (owned prefix stripped).
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    /// Prior index, for [`EventKind::Move`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamEvent {
    pub kind: EventKind,
    pub source: NodeId,
    pub payload: EventPayload,
}

impl UpstreamEvent {
    pub fn connect(source: NodeId, index: usize, name: &str, ty: TypeTag) -> Self {
        UpstreamEvent {
            kind: EventKind::Connect,
            source,
            payload: EventPayload {
                index,
                name: name.to_string(),
                ty,
                from: None,
            },
        }
    }

    pub fn disconnect(source: NodeId, index: usize, name: &str, ty: TypeTag) -> Self {
        UpstreamEvent {
            kind: EventKind::Disconnect,
            source,
            payload: EventPayload {
                index,
                name: name.to_string(),
                ty,
                from: None,
            },
        }
    }

    pub fn moved(source: NodeId, from: usize, to: usize, name: &str, ty: TypeTag) -> Self {
        UpstreamEvent {
            kind: EventKind::Move,
            source,
            payload: EventPayload {
                index: to,
                name: name.to_string(),
                ty,
                from: Some(from),
            },
        }
    }

    pub fn update(source: NodeId, index: usize, name: &str, ty: TypeTag) -> Self {
        UpstreamEvent {
            kind: EventKind::Update,
            source,
            payload: EventPayload {
                index,
                name: name.to_string(),
                ty,
                from: None,
            },
        }
    }
}

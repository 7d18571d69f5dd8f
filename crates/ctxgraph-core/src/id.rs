//! Stable ID newtypes for graph entities.
//!
//! Node and link identifiers are distinct newtype wrappers over `u32` so a
//! `NodeId` cannot be accidentally used where a `LinkId` is expected. Both
//! bridge to the petgraph index types of the underlying `StableGraph`.

use std::fmt;

use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

/// Stable node identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Stable link identifier. Maps to a petgraph `EdgeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeIndex<u32>> for NodeId {
    fn from(idx: NodeIndex<u32>) -> Self {
        NodeId(idx.index() as u32)
    }
}

impl From<NodeId> for NodeIndex<u32> {
    fn from(id: NodeId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

impl From<EdgeIndex<u32>> for LinkId {
    fn from(idx: EdgeIndex<u32>) -> Self {
        LinkId(idx.index() as u32)
    }
}

impl From<LinkId> for EdgeIndex<u32> {
    fn from(id: LinkId) -> Self {
        EdgeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(42);
        let node_id = NodeId::from(idx);
        assert_eq!(node_id.0, 42);

        let back: NodeIndex<u32> = node_id.into();
        assert_eq!(back.index(), 42);
    }

    #[test]
    fn link_id_to_edge_index_roundtrip() {
        let link = LinkId(9);
        let idx: EdgeIndex<u32> = link.into();
        assert_eq!(LinkId::from(idx), link);
    }

    #[test]
    fn display_prints_inner_value() {
        assert_eq!(format!("{}", NodeId(7)), "7");
        assert_eq!(format!("{}", LinkId(99)), "99");
    }
}

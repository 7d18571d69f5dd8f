pub mod id;
pub mod error;
pub mod field;
pub mod naming;
pub mod event;
pub mod registry;
pub mod shadow;
pub mod node;
pub mod graph;
pub mod invariants;

mod propagate;
mod relay;
mod merge;

// Re-export commonly used types
pub use id::{NodeId, LinkId};
pub use error::CoreError;
pub use field::{Field, FieldInfo, InputPort, OutputPort, TypeTag};
pub use event::{EventKind, EventPayload, UpstreamEvent};
pub use registry::{FieldRegistry, SlotRemap};
pub use shadow::ShadowEntry;
pub use node::{ContextNode, GraphNode, Link, MergeNode, NodeKind, PlainNode, RelayNode, RelayState};
pub use graph::{ContextGraph, LinkView};
pub use invariants::Violation;
pub use relay::stabilize_names;

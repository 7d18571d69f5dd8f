//! Storage for context graphs.
//!
//! Provides the [`GraphStore`] trait defining the storage contract, plus the
//! [`InMemoryStore`] and [`SqliteStore`] backends.
//!
//! # Architecture
//!
//! A graph is stored as flat rows: one per node (the serialized node,
//! registry included) and one per link. Loading is the two-phase restore of
//! the engine: [`convert::recompose`] rebuilds the arena with every id
//! preserved, then [`ContextGraph::settle`](ctxgraph_core::ContextGraph::settle)
//! re-derives merge nodes from their sources.
//!
//! Saves are either bulk (`save_graph`) or incremental (`save_nodes`), the
//! latter driven by the [`DirtySet`] computed from blake3 node hashes.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: GraphId, GraphSummary
//! - [`traits`]: GraphStore trait definition
//! - [`convert`]: ContextGraph decompose/recompose functions
//! - [`hash`]: blake3 node hashes
//! - [`dirty`]: dirty-node detection for incremental saves
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migration setup
//! - [`sqlite`]: SqliteStore implementation

pub mod convert;
pub mod dirty;
pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use dirty::{compute_dirty_nodes, DirtySet};
pub use error::StorageError;
pub use hash::{hash_graph, hash_node_schema, hash_node_with_links};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::GraphStore;
pub use types::{GraphId, GraphSummary};

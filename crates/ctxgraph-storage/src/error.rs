//! Storage error types for ctxgraph-storage.
//!
//! [`StorageError`] covers every failure mode of the storage layer:
//! serialization, SQLite and migration failures, missing graphs or nodes,
//! engine errors raised while settling a loaded graph and reconstruction
//! failures.

use thiserror::Error;

use ctxgraph_core::CoreError;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A graph with the given ID was not found.
    #[error("graph not found: {0}")]
    GraphNotFound(i64),

    /// A node was not found in the given graph.
    #[error("node not found: graph={graph}, node={node}")]
    NodeNotFound { graph: i64, node: u32 },

    /// The engine rejected the loaded graph, e.g. while settling merge nodes.
    #[error("engine error: {0}")]
    Core(#[from] CoreError),

    /// Failed to rebuild a ContextGraph from stored rows.
    #[error("reconstruction error: {reason}")]
    ReconstructionError { reason: String },
}

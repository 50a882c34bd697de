//! Core error types for graphmill-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! the failure modes of the graph data model and engine configuration.

use crate::id::{Color, EdgeId, VertexId};
use thiserror::Error;

/// Errors produced by the core graph data model.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A vertex id was not found in the graph.
    #[error("vertex not found: VertexId({id})", id = id.0)]
    VertexNotFound { id: VertexId },

    /// An edge id was not found in the graph.
    #[error("edge not found: EdgeId({id})", id = id.0)]
    EdgeNotFound { id: EdgeId },

    /// Self edges are not representable.
    #[error("self edge rejected on vertex {vertex}")]
    SelfEdge { vertex: VertexId },

    /// The graph was mutated after finalization.
    #[error("graph is finalized and can no longer be mutated")]
    Finalized,

    /// An operation that requires a finalized graph was called too early.
    #[error("graph is not finalized")]
    NotFinalized,

    /// An edge connects two vertices of the same color.
    #[error("invalid coloring: edge {edge} joins two vertices of color {color}")]
    InvalidColoring { edge: EdgeId, color: Color },

    /// Payload tables of the wrong size were handed back to the graph.
    #[error("payload table length mismatch: expected {expected}, got {actual}")]
    PayloadMismatch { expected: usize, actual: usize },
}

/// Errors produced while parsing or applying an engine configuration.
///
/// All configuration errors are fatal at `start()`: the engine refuses to
/// spawn any worker thread on a malformed configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The scheduler name is not known to the registry.
    #[error("unknown scheduler: '{0}'")]
    UnknownScheduler(String),

    /// The scheduler name is recognised but not available in this build.
    #[error("unsupported scheduler: '{0}'")]
    UnsupportedScheduler(String),

    /// The engine type is not one of `async` or `synchronous`.
    #[error("unknown engine type: '{0}'")]
    UnknownEngineType(String),

    /// The scope range name is not recognised.
    #[error("unknown scope range: '{0}'")]
    UnknownScopeRange(String),

    /// A scheduler spec string failed to parse.
    #[error("malformed scheduler spec: '{0}'")]
    MalformedSpec(String),

    /// A scheduler option value failed to parse as the expected type.
    #[error("invalid option '{key}={value}': expected {expected}")]
    InvalidOption {
        key: String,
        value: String,
        expected: &'static str,
    },
}

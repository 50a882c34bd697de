//! Error types for the execution layer.

use graphmill_core::config::ScopeRange;
use graphmill_core::error::{ConfigError, CoreError};
use graphmill_core::id::{EdgeId, VertexId};
use thiserror::Error;

/// Errors produced while building or running an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration, reported before any worker starts.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Topology error from the underlying graph.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An update function accessed data outside its scope range.
    #[error("scope violation: access requires {needed:?} but scope holds {held:?}")]
    ScopeViolation { needed: ScopeRange, held: ScopeRange },

    /// A vertex accessed through a scope is not adjacent to its center.
    #[error("vertex {vertex} is not adjacent to scope center {center}")]
    NotNeighbor { vertex: VertexId, center: VertexId },

    /// An edge accessed through a scope is not incident to its center.
    #[error("edge {edge} is not incident to scope center {center}")]
    NotIncident { edge: EdgeId, center: VertexId },
}

//! Builds an engine from an [`EngineConfig`].

use graphmill_core::config::{EngineConfig, EngineKind};
use graphmill_core::graph::DirectedGraph;

use super::{AsyncEngine, GraphEngine, SyncEngine};
use crate::error::EngineError;
use crate::scheduler::{create_scheduler, validate_scheduler_name};

/// Constructs the configured engine over a finalized graph.
///
/// All configuration and topology problems surface here, before any
/// worker thread exists.
pub fn create_engine<V, E>(
    graph: DirectedGraph<V, E>,
    config: &EngineConfig,
) -> Result<GraphEngine<V, E>, EngineError>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    match config.engine {
        EngineKind::Async => {
            let scheduler = create_scheduler(&config.scheduler, &graph, config.ncpus)?;
            Ok(GraphEngine::Async(AsyncEngine::new(graph, scheduler, config)?))
        }
        EngineKind::Synchronous => {
            // The scheduler is unused, but its name must still be valid
            // and its max_iterations option bounds the round count.
            validate_scheduler_name(&config.scheduler)?;
            let max_iterations = config
                .scheduler
                .options
                .get_u64("max_iterations")?
                .unwrap_or(1);
            Ok(GraphEngine::Synchronous(SyncEngine::new(
                graph,
                config,
                max_iterations,
            )?))
        }
    }
}

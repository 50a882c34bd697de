//! Builds schedulers from parsed [`SchedulerSpec`]s.

use graphmill_core::config::SchedulerSpec;
use graphmill_core::error::ConfigError;
use graphmill_core::graph::DirectedGraph;

use super::{
    ColoredScheduler, FifoScheduler, MultiQueueFifoScheduler, MultiQueuePriorityScheduler,
    PriorityScheduler, RoundRobinScheduler, SamplingScheduler, Scheduler, SweepScheduler,
};
use crate::error::EngineError;

/// Scheduler names the registry recognises.
pub const SCHEDULER_NAMES: &[&str] = &[
    "fifo",
    "multiqueue_fifo",
    "priority",
    "multiqueue_priority",
    "sweep",
    "colored",
    "chromatic",
    "sampling",
    "round_robin",
];

/// Constructs the scheduler named by `spec` for a finalized graph.
///
/// Unknown names and recognised-but-unavailable names (`splash`,
/// `clustered_priority`) are configuration errors; an invalid coloring
/// under the colored scheduler is a topology error. All surface before
/// any worker thread starts.
pub fn create_scheduler<V, E>(
    spec: &SchedulerSpec,
    graph: &DirectedGraph<V, E>,
    ncpus: usize,
) -> Result<Box<dyn Scheduler<V, E>>, EngineError>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let n = graph.num_vertices();
    let opts = &spec.options;
    match spec.name.as_str() {
        "fifo" => Ok(Box::new(FifoScheduler::new(n))),
        "multiqueue_fifo" => Ok(Box::new(MultiQueueFifoScheduler::new(n, ncpus))),
        "priority" => Ok(Box::new(PriorityScheduler::new(n))),
        "multiqueue_priority" => Ok(Box::new(MultiQueuePriorityScheduler::new(n, ncpus))),
        "sweep" => {
            let permute = opts.get_bool("permute")?.unwrap_or(false);
            let seed = opts.get_u64("seed")?.unwrap_or(0x5eed);
            Ok(Box::new(SweepScheduler::new(
                n,
                ncpus,
                permute.then_some(seed),
            )))
        }
        // `chromatic` is the historical name for the colored schedule.
        "colored" | "chromatic" => {
            let max_iterations = opts.get_u64("max_iterations")?.unwrap_or(0);
            Ok(Box::new(ColoredScheduler::new(graph, ncpus, max_iterations)?))
        }
        "sampling" => Ok(Box::new(SamplingScheduler::new(n))),
        "round_robin" => {
            let max_iterations = opts.get_u64("max_iterations")?.unwrap_or(0);
            let start_vertex = opts.get_u64("start_vertex")?.unwrap_or(0);
            let block_size = opts.get_u64("block_size")?.unwrap_or(1);
            Ok(Box::new(RoundRobinScheduler::new(
                n,
                ncpus,
                start_vertex,
                max_iterations,
                block_size,
            )))
        }
        "splash" | "clustered_priority" => Err(EngineError::Config(
            ConfigError::UnsupportedScheduler(spec.name.clone()),
        )),
        _ => Err(EngineError::Config(ConfigError::UnknownScheduler(
            spec.name.clone(),
        ))),
    }
}

/// Validates a scheduler name without building anything.
pub fn validate_scheduler_name(spec: &SchedulerSpec) -> Result<(), ConfigError> {
    if SCHEDULER_NAMES.contains(&spec.name.as_str()) {
        Ok(())
    } else if spec.name == "splash" || spec.name == "clustered_priority" {
        Err(ConfigError::UnsupportedScheduler(spec.name.clone()))
    } else {
        Err(ConfigError::UnknownScheduler(spec.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmill_core::config::SchedulerSpec;

    fn small_graph() -> DirectedGraph<u64, ()> {
        let mut g = DirectedGraph::new();
        for _ in 0..3 {
            g.add_vertex(0).unwrap();
        }
        g.finalize();
        g
    }

    #[test]
    fn builds_every_registered_scheduler() {
        let g = small_graph();
        for name in ["fifo", "multiqueue_fifo", "priority", "multiqueue_priority", "sweep", "sampling", "round_robin"] {
            let spec = SchedulerSpec::named(name);
            assert!(create_scheduler(&spec, &g, 2).is_ok(), "failed: {name}");
        }
    }

    #[test]
    fn unknown_scheduler_is_a_config_error() {
        let g = small_graph();
        let spec = SchedulerSpec::named("banana");
        assert!(matches!(
            create_scheduler(&spec, &g, 1),
            Err(EngineError::Config(ConfigError::UnknownScheduler(_)))
        ));
    }

    #[test]
    fn recognised_but_unavailable_names_are_distinct_errors() {
        let g = small_graph();
        let spec = SchedulerSpec::named("splash");
        assert!(matches!(
            create_scheduler(&spec, &g, 1),
            Err(EngineError::Config(ConfigError::UnsupportedScheduler(_)))
        ));
    }

    #[test]
    fn sweep_options_parse() {
        let g = small_graph();
        let spec: SchedulerSpec = "sweep(permute=true, seed=9)".parse().unwrap();
        assert!(create_scheduler(&spec, &g, 2).is_ok());
    }
}

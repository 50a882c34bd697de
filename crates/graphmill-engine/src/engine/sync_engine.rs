//! The synchronous engine: barriered rounds over every vertex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use graphmill_core::config::{EngineConfig, ScopeRange};
use graphmill_core::graph::DirectedGraph;
use graphmill_core::id::VertexId;
use graphmill_core::shared::{SharedData, TerminationFn};

use super::{AbortState, ExecutionStatus, StopHandle, TERMINATION_CHECK_INTERVAL};
use crate::error::EngineError;
use crate::scheduler::TaskPoster;
use crate::scope::ScopeFactory;
use crate::task::UpdateFn;

/// Synchronous engine.
///
/// Each round, every worker sweeps a strided slice of the vertex set and
/// applies the configured update function under the default scope range;
/// a barrier (the end of the spawn scope) separates rounds. Runs for
/// `max_iterations` rounds or until a timeout, budget, termination
/// function or stop interrupts.
pub struct SyncEngine<V, E> {
    graph: DirectedGraph<V, E>,
    update_fn: Mutex<Option<UpdateFn<V, E>>>,
    max_iterations: u64,
    ncpus: usize,
    default_scope: ScopeRange,
    task_budget: u64,
    timeout: Option<Duration>,
    shared: SharedData,
    term_fns: Vec<TerminationFn>,
    abort: Arc<AbortState>,
    last_update_count: u64,
    last_status: Option<ExecutionStatus>,
    elapsed: Duration,
}

impl<V, E> SyncEngine<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a synchronous engine over a finalized graph.
    pub fn new(
        graph: DirectedGraph<V, E>,
        config: &EngineConfig,
        max_iterations: u64,
    ) -> Result<Self, EngineError> {
        if !graph.is_finalized() {
            return Err(graphmill_core::error::CoreError::NotFinalized.into());
        }
        Ok(SyncEngine {
            graph,
            update_fn: Mutex::new(None),
            max_iterations,
            ncpus: config.ncpus.max(1),
            default_scope: config.default_scope,
            task_budget: config.task_budget,
            timeout: config.timeout,
            shared: SharedData::new(),
            term_fns: Vec::new(),
            abort: AbortState::new(),
            last_update_count: 0,
            last_status: None,
            elapsed: Duration::ZERO,
        })
    }

    /// Sets the update function applied to every vertex each round.
    pub fn set_update_function(&self, func: UpdateFn<V, E>) {
        *self.update_fn.lock() = Some(func);
    }

    /// Registers a termination predicate over the shared data.
    pub fn add_termination_fn(&mut self, f: TerminationFn) {
        self.term_fns.push(f);
    }

    /// Mutable access to the shared data, before `start()`.
    pub fn shared_data_mut(&mut self) -> &mut SharedData {
        &mut self.shared
    }

    /// Changes the default scope range for subsequent runs.
    pub fn set_default_scope(&mut self, range: ScopeRange) {
        self.default_scope = range;
    }

    /// A handle that can stop this engine from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.abort))
    }

    /// Wall-clock duration of the last run.
    pub fn elapsed_time(&self) -> Duration {
        self.elapsed
    }

    /// Updates executed by the last run.
    pub fn last_update_count(&self) -> u64 {
        self.last_update_count
    }

    /// Status of the last run, if any run has finished.
    pub fn last_exec_status(&self) -> Option<ExecutionStatus> {
        self.last_status
    }

    /// The graph, with payloads reflecting the last run.
    pub fn graph(&self) -> &DirectedGraph<V, E> {
        &self.graph
    }

    /// Consumes the engine, returning the graph.
    pub fn into_graph(self) -> DirectedGraph<V, E> {
        self.graph
    }

    /// Runs the configured number of rounds.
    pub fn start(&mut self) -> Result<ExecutionStatus, EngineError> {
        self.abort.reset();
        let update_fn = match *self.update_fn.lock() {
            Some(f) => f,
            None => {
                tracing::warn!("synchronous engine started without an update function");
                self.last_status = Some(ExecutionStatus::Completed);
                self.last_update_count = 0;
                return Ok(ExecutionStatus::Completed);
            }
        };

        let (vertex_payloads, edge_payloads) = self.graph.take_payloads();
        let factory = ScopeFactory::new(
            &self.graph,
            vertex_payloads,
            edge_payloads,
            self.default_scope,
        );
        let started = Instant::now();
        let counter = AtomicU64::new(0);
        let num_vertices = self.graph.num_vertices();
        let ncpus = self.ncpus;
        let timeout = self.timeout;
        let budget = self.task_budget;
        let max_iterations = self.max_iterations;
        let shared = &self.shared;
        let term_fns = self.term_fns.as_slice();
        let abort = Arc::clone(&self.abort);

        for round in 0..max_iterations {
            if abort.is_aborted() {
                break;
            }
            tracing::debug!(round, "synchronous round starting");
            thread::scope(|s| {
                for worker in 0..ncpus {
                    let factory = &factory;
                    let abort = abort.as_ref();
                    let counter = &counter;
                    s.spawn(move || {
                        let poster = TaskPoster::noop();
                        let mut last_term_check = Instant::now();
                        for index in (worker..num_vertices).step_by(ncpus) {
                            if abort.is_aborted() {
                                return;
                            }
                            if worker == 0 {
                                if let Some(timeout) = timeout {
                                    if started.elapsed() >= timeout {
                                        abort.abort_with(ExecutionStatus::Timeout);
                                        return;
                                    }
                                }
                            }
                            if !term_fns.is_empty()
                                && last_term_check.elapsed() >= TERMINATION_CHECK_INTERVAL
                            {
                                if term_fns.iter().any(|f| f(shared)) {
                                    abort.abort_with(ExecutionStatus::TermFunction);
                                    return;
                                }
                                last_term_check = Instant::now();
                            }

                            let vertex = VertexId(index as u32);
                            let mut scope = factory.get_scope(worker, vertex);
                            update_fn(&mut scope, &poster, shared);
                            scope.commit();
                            factory.release_scope(scope);

                            let executed = counter.fetch_add(1, Ordering::SeqCst) + 1;
                            if budget > 0 && executed > budget {
                                abort.abort_with(ExecutionStatus::BudgetExceeded);
                                return;
                            }
                        }
                    });
                }
            });
        }

        self.elapsed = started.elapsed();
        let (vertex_payloads, edge_payloads) = factory.into_payloads();
        self.graph.restore_payloads(vertex_payloads, edge_payloads)?;

        let total = counter.load(Ordering::SeqCst);
        let status = self.abort.take_status().unwrap_or(ExecutionStatus::Completed);
        tracing::info!(
            total_tasks = total,
            elapsed_ms = self.elapsed.as_millis() as u64,
            ?status,
            "synchronous run finished"
        );
        self.last_update_count = total;
        self.last_status = Some(status);
        Ok(status)
    }
}

//! The asynchronous worker-thread engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use graphmill_core::config::{EngineConfig, ScopeRange};
use graphmill_core::graph::DirectedGraph;
use graphmill_core::id::VertexId;
use graphmill_core::shared::{SharedData, TerminationFn};

use super::{
    AbortState, ExecutionStatus, StopHandle, POLL_SLEEP, TERMINATION_CHECK_INTERVAL,
};
use crate::error::EngineError;
use crate::scheduler::{SchedStatus, Scheduler, TaskPoster, WorkerId};
use crate::scope::ScopeFactory;
use crate::task::{UpdateFn, UpdateTask};

/// Everything a worker thread shares with its siblings for one run.
struct WorkerShared<'a, 'g, V, E> {
    scheduler: &'a dyn Scheduler<V, E>,
    factory: &'a ScopeFactory<'g, V, E>,
    shared: &'a SharedData,
    term_fns: &'a [TerminationFn],
    abort: &'a AbortState,
    timeout: Option<Duration>,
    started: Instant,
    budget: u64,
    counter: &'a AtomicU64,
}

/// Multi-threaded engine: `ncpus` workers pull tasks from the scheduler,
/// execute them under consistency scopes, and run until the terminator
/// fires or a timeout, task budget, termination function or explicit stop
/// interrupts the schedule.
pub struct AsyncEngine<V, E> {
    graph: DirectedGraph<V, E>,
    scheduler: Box<dyn Scheduler<V, E>>,
    ncpus: usize,
    default_scope: ScopeRange,
    task_budget: u64,
    timeout: Option<Duration>,
    cpu_affinity: bool,
    shared: SharedData,
    term_fns: Vec<TerminationFn>,
    abort: Arc<AbortState>,
    last_update_count: u64,
    last_status: Option<ExecutionStatus>,
    elapsed: Duration,
}

impl<V, E> AsyncEngine<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates an engine over a finalized graph with a ready scheduler.
    pub fn new(
        graph: DirectedGraph<V, E>,
        scheduler: Box<dyn Scheduler<V, E>>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        if !graph.is_finalized() {
            return Err(graphmill_core::error::CoreError::NotFinalized.into());
        }
        Ok(AsyncEngine {
            graph,
            scheduler,
            ncpus: config.ncpus.max(1),
            default_scope: config.default_scope,
            task_budget: config.task_budget,
            timeout: config.timeout,
            cpu_affinity: config.cpu_affinity,
            shared: SharedData::new(),
            term_fns: Vec::new(),
            abort: AbortState::new(),
            last_update_count: 0,
            last_status: None,
            elapsed: Duration::ZERO,
        })
    }

    /// Posts a task to the scheduler.
    pub fn add_task(&self, vertex: VertexId, func: UpdateFn<V, E>, priority: f64) {
        self.scheduler.add_task(UpdateTask::new(vertex, func), priority);
    }

    /// Posts the same function over a set of vertices.
    pub fn add_tasks(&self, vertices: &[VertexId], func: UpdateFn<V, E>, priority: f64) {
        self.scheduler.add_tasks(vertices, func, priority);
    }

    /// Posts the same function over every vertex.
    pub fn add_task_to_all(&self, func: UpdateFn<V, E>, priority: f64) {
        self.scheduler.add_task_to_all(func, priority);
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

    /// The scheduler driving this engine.
    pub fn scheduler(&self) -> &dyn Scheduler<V, E> {
        self.scheduler.as_ref()
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

    /// Executes the posted tasks to convergence or interruption.
    pub fn start(&mut self) -> Result<ExecutionStatus, EngineError> {
        self.abort.reset();
        if self.cpu_affinity {
            tracing::debug!("cpu affinity requested; not supported here, ignoring");
        }

        let (vertex_payloads, edge_payloads) = self.graph.take_payloads();
        let factory = ScopeFactory::new(
            &self.graph,
            vertex_payloads,
            edge_payloads,
            self.default_scope,
        );
        let started = Instant::now();
        self.scheduler.start();

        let counter = AtomicU64::new(0);
        let worker_counts: Vec<AtomicU64> =
            (0..self.ncpus).map(|_| AtomicU64::new(0)).collect();
        let ctx = WorkerShared {
            scheduler: self.scheduler.as_ref(),
            factory: &factory,
            shared: &self.shared,
            term_fns: &self.term_fns,
            abort: &*self.abort,
            timeout: self.timeout,
            started,
            budget: self.task_budget,
            counter: &counter,
        };

        thread::scope(|s| {
            for worker in 0..self.ncpus {
                let ctx = &ctx;
                let mine = &worker_counts[worker];
                s.spawn(move || worker_loop(ctx, worker, mine));
            }
        });

        self.elapsed = started.elapsed();
        let (vertex_payloads, edge_payloads) = factory.into_payloads();
        self.graph.restore_payloads(vertex_payloads, edge_payloads)?;

        let mut total = 0u64;
        for (worker, count) in worker_counts.iter().enumerate() {
            let count = count.load(Ordering::SeqCst);
            total += count;
            tracing::debug!(worker, tasks = count, "worker finished");
        }
        let status = self.abort.take_status().unwrap_or(ExecutionStatus::Completed);
        tracing::info!(
            total_tasks = total,
            elapsed_ms = self.elapsed.as_millis() as u64,
            ?status,
            "engine run finished"
        );
        self.last_update_count = total;
        self.last_status = Some(status);
        Ok(status)
    }
}

/// One worker's pull-execute-commit loop.
fn worker_loop<V, E>(ctx: &WorkerShared<'_, '_, V, E>, worker: WorkerId, mine: &AtomicU64)
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let poster = TaskPoster::new(ctx.scheduler);
    let mut last_term_check = Instant::now();

    loop {
        if ctx.abort.is_aborted() {
            return;
        }
        // Worker 0 owns the wall-clock timeout.
        if worker == 0 {
            if let Some(timeout) = ctx.timeout {
                if ctx.started.elapsed() >= timeout {
                    ctx.abort.abort_with(ExecutionStatus::Timeout);
                    return;
                }
            }
        }
        if !ctx.term_fns.is_empty() && last_term_check.elapsed() >= TERMINATION_CHECK_INTERVAL {
            if ctx.term_fns.iter().any(|f| f(ctx.shared)) {
                ctx.abort.abort_with(ExecutionStatus::TermFunction);
                return;
            }
            last_term_check = Instant::now();
        }

        match ctx.scheduler.get_next_task(worker) {
            SchedStatus::Empty => {
                if ctx.scheduler.terminator().finished() {
                    return;
                }
                thread::sleep(POLL_SLEEP);
            }
            SchedStatus::Waiting => thread::sleep(POLL_SLEEP),
            SchedStatus::NewTask(task) => {
                let mut scope = ctx.factory.get_scope(worker, task.vertex());
                (task.function())(&mut scope, &poster, ctx.shared);
                scope.commit();
                ctx.factory.release_scope(scope);
                ctx.scheduler.completed_task(worker, &task);

                mine.fetch_add(1, Ordering::SeqCst);
                let executed = ctx.counter.fetch_add(1, Ordering::SeqCst) + 1;
                if ctx.budget > 0 && executed > ctx.budget {
                    ctx.abort.abort_with(ExecutionStatus::BudgetExceeded);
                    return;
                }
            }
        }
    }
}

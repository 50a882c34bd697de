//! Execution engines: drive update functions to convergence over a graph.
//!
//! [`AsyncEngine`] runs one OS thread per worker pulling tasks from a
//! scheduler; [`SyncEngine`] runs barriered rounds over all vertices.
//! [`GraphEngine`] is the tagged variant the engine factory returns, so a
//! caller can configure either kind from the same [`EngineConfig`]
//! surface.

mod async_engine;
mod factory;
mod sync_engine;

pub use async_engine::AsyncEngine;
pub use factory::create_engine;
pub use sync_engine::SyncEngine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use graphmill_core::config::ScopeRange;
use graphmill_core::graph::DirectedGraph;
use graphmill_core::id::VertexId;
use graphmill_core::shared::{SharedData, TerminationFn};

use crate::error::EngineError;
use crate::scheduler::Scheduler;
use crate::task::UpdateFn;

/// Why the last run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The scheduler drained and its terminator reported finished.
    Completed,
    /// The wall-clock timeout fired.
    Timeout,
    /// The task budget was exceeded.
    BudgetExceeded,
    /// A registered termination function fired.
    TermFunction,
    /// `stop()` was called.
    ForcedStop,
}

/// How often workers re-evaluate termination functions.
pub(crate) const TERMINATION_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// How long a worker sleeps on `Empty`/`Waiting` before asking again.
pub(crate) const POLL_SLEEP: Duration = Duration::from_micros(10);

/// Shared abort flag plus the first non-success status observed.
pub(crate) struct AbortState {
    aborted: AtomicBool,
    status: Mutex<Option<ExecutionStatus>>,
}

impl AbortState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(AbortState {
            aborted: AtomicBool::new(false),
            status: Mutex::new(None),
        })
    }

    /// Clears the flag for a fresh run.
    pub(crate) fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
        *self.status.lock() = None;
    }

    /// Raises the abort flag; the first status recorded wins.
    pub(crate) fn abort_with(&self, status: ExecutionStatus) {
        let mut slot = self.status.lock();
        if slot.is_none() {
            *slot = Some(status);
        }
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn take_status(&self) -> Option<ExecutionStatus> {
        self.status.lock().take()
    }
}

/// Handle for stopping a running engine from another thread.
///
/// `stop()` is idempotent and asynchronous: in-flight tasks finish, no new
/// tasks start, and the blocked `start()` call returns `ForcedStop`.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<AbortState>,
}

impl StopHandle {
    pub(crate) fn new(state: Arc<AbortState>) -> Self {
        StopHandle { state }
    }

    /// Requests the engine stop.
    pub fn stop(&self) {
        self.state.abort_with(ExecutionStatus::ForcedStop);
    }
}

/// An engine of either kind, selected by configuration.
pub enum GraphEngine<V, E> {
    Async(AsyncEngine<V, E>),
    Synchronous(SyncEngine<V, E>),
}

impl<V, E> GraphEngine<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Posts a task. Under the synchronous engine this fixes the update
    /// function applied each round.
    pub fn add_task(&self, vertex: VertexId, func: UpdateFn<V, E>, priority: f64) {
        match self {
            GraphEngine::Async(e) => e.add_task(vertex, func, priority),
            GraphEngine::Synchronous(e) => e.set_update_function(func),
        }
    }

    /// Posts the same function over a set of vertices.
    pub fn add_tasks(&self, vertices: &[VertexId], func: UpdateFn<V, E>, priority: f64) {
        match self {
            GraphEngine::Async(e) => e.add_tasks(vertices, func, priority),
            GraphEngine::Synchronous(e) => e.set_update_function(func),
        }
    }

    /// Posts the same function over every vertex.
    pub fn add_task_to_all(&self, func: UpdateFn<V, E>, priority: f64) {
        match self {
            GraphEngine::Async(e) => e.add_task_to_all(func, priority),
            GraphEngine::Synchronous(e) => e.set_update_function(func),
        }
    }

    /// Runs to convergence or interruption. Blocking.
    pub fn start(&mut self) -> Result<ExecutionStatus, EngineError> {
        match self {
            GraphEngine::Async(e) => e.start(),
            GraphEngine::Synchronous(e) => e.start(),
        }
    }

    /// A handle that can stop this engine from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        match self {
            GraphEngine::Async(e) => e.stop_handle(),
            GraphEngine::Synchronous(e) => e.stop_handle(),
        }
    }

    /// Registers a termination predicate over the shared data.
    pub fn add_termination_fn(&mut self, f: TerminationFn) {
        match self {
            GraphEngine::Async(e) => e.add_termination_fn(f),
            GraphEngine::Synchronous(e) => e.add_termination_fn(f),
        }
    }

    /// Mutable access to the shared data, before `start()`.
    pub fn shared_data_mut(&mut self) -> &mut SharedData {
        match self {
            GraphEngine::Async(e) => e.shared_data_mut(),
            GraphEngine::Synchronous(e) => e.shared_data_mut(),
        }
    }

    /// Changes the default scope range for subsequent runs.
    pub fn set_default_scope(&mut self, range: ScopeRange) {
        match self {
            GraphEngine::Async(e) => e.set_default_scope(range),
            GraphEngine::Synchronous(e) => e.set_default_scope(range),
        }
    }

    /// The scheduler, when this engine has one.
    pub fn scheduler(&self) -> Option<&dyn Scheduler<V, E>> {
        match self {
            GraphEngine::Async(e) => Some(e.scheduler()),
            GraphEngine::Synchronous(_) => None,
        }
    }

    /// Wall-clock duration of the last run.
    pub fn elapsed_time(&self) -> Duration {
        match self {
            GraphEngine::Async(e) => e.elapsed_time(),
            GraphEngine::Synchronous(e) => e.elapsed_time(),
        }
    }

    /// Updates executed by the last run.
    pub fn last_update_count(&self) -> u64 {
        match self {
            GraphEngine::Async(e) => e.last_update_count(),
            GraphEngine::Synchronous(e) => e.last_update_count(),
        }
    }

    /// Status of the last run, if any run has finished.
    pub fn last_exec_status(&self) -> Option<ExecutionStatus> {
        match self {
            GraphEngine::Async(e) => e.last_exec_status(),
            GraphEngine::Synchronous(e) => e.last_exec_status(),
        }
    }

    /// The graph, with payloads reflecting the last run.
    pub fn graph(&self) -> &DirectedGraph<V, E> {
        match self {
            GraphEngine::Async(e) => e.graph(),
            GraphEngine::Synchronous(e) => e.graph(),
        }
    }

    /// Consumes the engine, returning the graph.
    pub fn into_graph(self) -> DirectedGraph<V, E> {
        match self {
            GraphEngine::Async(e) => e.into_graph(),
            GraphEngine::Synchronous(e) => e.into_graph(),
        }
    }
}

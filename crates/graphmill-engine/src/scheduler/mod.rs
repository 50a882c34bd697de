//! The scheduler interface and its implementations.
//!
//! A scheduler decides which vertex to update next and detects
//! termination. The engine drives it through a narrow contract:
//! tasks go in through `add_task` and friends, come out through
//! `get_next_task`, and every handed-out task is acknowledged with exactly
//! one `completed_task` call. The scheduler's [`Terminator`] is the only
//! authority on termination; `Empty` alone never ends a run.
//!
//! All methods must be thread-safe: every worker calls into the same
//! scheduler concurrently.

mod colored;
mod fifo;
mod multiqueue_fifo;
mod multiqueue_priority;
mod priority;
mod registry;
mod round_robin;
mod sampling;
mod support;
mod sweep;
pub mod terminator;

pub use colored::ColoredScheduler;
pub use fifo::FifoScheduler;
pub use multiqueue_fifo::MultiQueueFifoScheduler;
pub use multiqueue_priority::MultiQueuePriorityScheduler;
pub use priority::PriorityScheduler;
pub use registry::{create_scheduler, validate_scheduler_name, SCHEDULER_NAMES};
pub use round_robin::RoundRobinScheduler;
pub use sampling::SamplingScheduler;
pub use support::{AddOutcome, FastMultinomial, VertexTaskSet};
pub use sweep::SweepScheduler;
pub use terminator::{ControlledTerminator, TaskCountTerminator, Terminator};

use std::sync::Arc;

use parking_lot::RwLock;

use graphmill_core::id::VertexId;

use crate::task::{UpdateFn, UpdateTask};

/// Index of a worker thread within one engine run.
pub type WorkerId = usize;

/// Result of asking a scheduler for work.
pub enum SchedStatus<V, E> {
    /// A task to execute now. It has been removed from the scheduler's
    /// internal set and must be acknowledged with `completed_task`.
    NewTask(UpdateTask<V, E>),
    /// No tasks available. Check the terminator before concluding the run
    /// is over; tasks may still be executing on other workers.
    Empty,
    /// No task right now, but do not terminate: work is in flight
    /// elsewhere and may reschedule. Treat as a short-sleep hint.
    Waiting,
}

/// The scheduling contract between the engine and a scheduler.
pub trait Scheduler<V, E>: Send + Sync {
    /// Called once by the engine before the first `get_next_task`.
    fn start(&self) {}

    /// Adds an update task with a priority. May be called at any time,
    /// including from inside update functions via a [`TaskPoster`].
    fn add_task(&self, task: UpdateTask<V, E>, priority: f64);

    /// Adds the same function over a set of vertices.
    fn add_tasks(&self, vertices: &[VertexId], func: UpdateFn<V, E>, priority: f64) {
        for &vertex in vertices {
            self.add_task(UpdateTask::new(vertex, func), priority);
        }
    }

    /// Adds the same function over every vertex in the graph.
    fn add_task_to_all(&self, func: UpdateFn<V, E>, priority: f64);

    /// Hands out the next task for `worker`, removing it from the
    /// internal set.
    fn get_next_task(&self, worker: WorkerId) -> SchedStatus<V, E>;

    /// Acknowledges a task previously handed out by `get_next_task`.
    /// Delivered exactly once per handed-out task.
    fn completed_task(&self, worker: WorkerId, task: &UpdateTask<V, E>);

    /// The terminator that decides when the run is over.
    fn terminator(&self) -> &dyn Terminator;

    /// Installs a monitor receiving scheduling events.
    fn register_monitor(&self, monitor: Arc<dyn Monitor>);
}

/// Listener for scheduling events. All hooks default to no-ops.
pub trait Monitor: Send + Sync {
    /// A task entered the scheduler for the first time.
    fn task_added(&self, _vertex: VertexId, _priority: f64) {}
    /// A pending task's priority was raised by a re-add.
    fn task_promoted(&self, _vertex: VertexId, _priority: f64) {}
    /// A handed-out task finished executing.
    fn task_completed(&self, _vertex: VertexId) {}
}

/// Shared slot for an optionally registered monitor.
pub(crate) struct MonitorSlot {
    inner: RwLock<Option<Arc<dyn Monitor>>>,
}

impl MonitorSlot {
    pub(crate) fn new() -> Self {
        MonitorSlot {
            inner: RwLock::new(None),
        }
    }

    pub(crate) fn register(&self, monitor: Arc<dyn Monitor>) {
        *self.inner.write() = Some(monitor);
    }

    pub(crate) fn added(&self, vertex: VertexId, priority: f64) {
        if let Some(m) = self.inner.read().as_ref() {
            m.task_added(vertex, priority);
        }
    }

    pub(crate) fn promoted(&self, vertex: VertexId, priority: f64) {
        if let Some(m) = self.inner.read().as_ref() {
            m.task_promoted(vertex, priority);
        }
    }

    pub(crate) fn completed(&self, vertex: VertexId) {
        if let Some(m) = self.inner.read().as_ref() {
            m.task_completed(vertex);
        }
    }
}

/// The callback handed to update functions for posting new tasks.
///
/// A no-op poster backs schedulers whose tasks are implicit (colored,
/// round-robin) and the synchronous engine.
pub struct TaskPoster<'a, V, E> {
    scheduler: Option<&'a dyn Scheduler<V, E>>,
}

impl<'a, V, E> TaskPoster<'a, V, E> {
    /// A poster forwarding to `scheduler`.
    pub fn new(scheduler: &'a dyn Scheduler<V, E>) -> Self {
        TaskPoster {
            scheduler: Some(scheduler),
        }
    }

    /// A poster that ignores all posts.
    pub fn noop() -> Self {
        TaskPoster { scheduler: None }
    }

    /// Schedules `func` on `vertex` with the given priority.
    pub fn schedule(&self, vertex: VertexId, func: UpdateFn<V, E>, priority: f64) {
        if let Some(scheduler) = self.scheduler {
            scheduler.add_task(UpdateTask::new(vertex, func), priority);
        }
    }

    /// Schedules `func` on several vertices with the same priority.
    pub fn schedule_many(&self, vertices: &[VertexId], func: UpdateFn<V, E>, priority: f64) {
        if let Some(scheduler) = self.scheduler {
            scheduler.add_tasks(vertices, func, priority);
        }
    }
}

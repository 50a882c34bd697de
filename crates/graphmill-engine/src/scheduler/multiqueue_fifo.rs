//! Per-worker FIFO queues with work stealing.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use graphmill_core::id::VertexId;

use super::support::{AddOutcome, VertexTaskSet};
use super::terminator::{TaskCountTerminator, Terminator};
use super::{Monitor, MonitorSlot, SchedStatus, Scheduler, WorkerId};
use crate::task::{UpdateFn, UpdateTask};

/// Multi-queue FIFO scheduler: one queue per worker, tasks placed by
/// vertex id, stealing from other queues when the local one runs dry.
///
/// Deduplication works exactly as in the single-queue scheduler, through
/// the shared per-vertex task set.
pub struct MultiQueueFifoScheduler<V, E> {
    queues: Vec<Mutex<VecDeque<UpdateTask<V, E>>>>,
    tasks: VertexTaskSet<V, E>,
    terminator: TaskCountTerminator,
    monitor: MonitorSlot,
    num_vertices: usize,
}

impl<V, E> MultiQueueFifoScheduler<V, E> {
    /// A scheduler with one queue per worker.
    pub fn new(num_vertices: usize, ncpus: usize) -> Self {
        MultiQueueFifoScheduler {
            queues: (0..ncpus.max(1)).map(|_| Mutex::new(VecDeque::new())).collect(),
            tasks: VertexTaskSet::new(num_vertices),
            terminator: TaskCountTerminator::new(),
            monitor: MonitorSlot::new(),
            num_vertices,
        }
    }

    /// Queue a vertex's tasks always land in.
    fn home_queue(&self, vertex: VertexId) -> usize {
        vertex.index() % self.queues.len()
    }
}

impl<V: 'static, E: 'static> Scheduler<V, E> for MultiQueueFifoScheduler<V, E> {
    fn add_task(&self, task: UpdateTask<V, E>, priority: f64) {
        match self.tasks.add(task, priority).0 {
            AddOutcome::Added => {
                self.terminator.new_job();
                self.queues[self.home_queue(task.vertex())].lock().push_back(task);
                self.monitor.added(task.vertex(), priority);
            }
            AddOutcome::Promoted => self.monitor.promoted(task.vertex(), priority),
            AddOutcome::Unchanged => {}
        }
    }

    fn add_task_to_all(&self, func: UpdateFn<V, E>, priority: f64) {
        for v in 0..self.num_vertices {
            self.add_task(UpdateTask::new(VertexId(v as u32), func), priority);
        }
    }

    fn get_next_task(&self, worker: WorkerId) -> SchedStatus<V, E> {
        let n = self.queues.len();
        // Own queue first, then sweep the others.
        for offset in 0..n {
            let q = (worker + offset) % n;
            loop {
                let task = self.queues[q].lock().pop_front();
                match task {
                    None => break,
                    Some(task) => {
                        if self.tasks.remove(task.vertex(), task.function()) {
                            return SchedStatus::NewTask(task);
                        }
                    }
                }
            }
        }
        SchedStatus::Empty
    }

    fn completed_task(&self, _worker: WorkerId, task: &UpdateTask<V, E>) {
        self.terminator.completed_job();
        self.monitor.completed(task.vertex());
    }

    fn terminator(&self) -> &dyn Terminator {
        &self.terminator
    }

    fn register_monitor(&self, monitor: Arc<dyn Monitor>) {
        self.monitor.register(monitor);
    }
}

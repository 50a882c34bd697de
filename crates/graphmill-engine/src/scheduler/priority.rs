//! Shared priority-heap scheduler.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;

use graphmill_core::id::VertexId;

use super::support::{AddOutcome, VertexTaskSet};
use super::terminator::{TaskCountTerminator, Terminator};
use super::{Monitor, MonitorSlot, SchedStatus, Scheduler, WorkerId};
use crate::task::{UpdateFn, UpdateTask};

/// Heap entry ordered by priority, ties broken towards older entries.
pub(crate) struct HeapEntry<V, E> {
    pub(crate) priority: f64,
    pub(crate) seq: u64,
    pub(crate) task: UpdateTask<V, E>,
}

impl<V, E> PartialEq for HeapEntry<V, E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<V, E> Eq for HeapEntry<V, E> {}

impl<V, E> PartialOrd for HeapEntry<V, E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V, E> Ord for HeapEntry<V, E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority scheduler: one shared binary heap keyed by task priority.
///
/// The heap is lazy: promoting a pending task pushes a second entry with
/// the higher priority rather than re-keying in place. The per-vertex task
/// set is the source of truth; a popped entry whose pair is no longer
/// pending is stale and skipped.
pub struct PriorityScheduler<V, E> {
    heap: Mutex<BinaryHeap<HeapEntry<V, E>>>,
    tasks: VertexTaskSet<V, E>,
    terminator: TaskCountTerminator,
    monitor: MonitorSlot,
    seq: AtomicU64,
    num_vertices: usize,
}

impl<V, E> PriorityScheduler<V, E> {
    /// A scheduler over a graph with `num_vertices` vertices.
    pub fn new(num_vertices: usize) -> Self {
        PriorityScheduler {
            heap: Mutex::new(BinaryHeap::new()),
            tasks: VertexTaskSet::new(num_vertices),
            terminator: TaskCountTerminator::new(),
            monitor: MonitorSlot::new(),
            seq: AtomicU64::new(0),
            num_vertices,
        }
    }

    fn push(&self, task: UpdateTask<V, E>, priority: f64) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().push(HeapEntry {
            priority,
            seq,
            task,
        });
    }
}

impl<V: 'static, E: 'static> Scheduler<V, E> for PriorityScheduler<V, E> {
    fn add_task(&self, task: UpdateTask<V, E>, priority: f64) {
        match self.tasks.add(task, priority).0 {
            AddOutcome::Added => {
                self.terminator.new_job();
                self.push(task, priority);
                self.monitor.added(task.vertex(), priority);
            }
            AddOutcome::Promoted => {
                self.push(task, priority);
                self.monitor.promoted(task.vertex(), priority);
            }
            AddOutcome::Unchanged => {}
        }
    }

    fn add_task_to_all(&self, func: UpdateFn<V, E>, priority: f64) {
        for v in 0..self.num_vertices {
            self.add_task(UpdateTask::new(VertexId(v as u32), func), priority);
        }
    }

    fn get_next_task(&self, _worker: WorkerId) -> SchedStatus<V, E> {
        loop {
            let entry = self.heap.lock().pop();
            match entry {
                None => return SchedStatus::Empty,
                Some(entry) => {
                    if self.tasks.remove(entry.task.vertex(), entry.task.function()) {
                        return SchedStatus::NewTask(entry.task);
                    }
                    // Stale duplicate left behind by a promotion.
                }
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use graphmill_core::shared::SharedData;

    use crate::scheduler::TaskPoster;
    use crate::scope::VertexScope;

    fn noop(s: &mut VertexScope<'_, u64, ()>, _: &TaskPoster<'_, u64, ()>, _: &SharedData) {
        let _ = s.center();
    }

    fn expect_vertex(status: SchedStatus<u64, ()>) -> VertexId {
        match status {
            SchedStatus::NewTask(t) => t.vertex(),
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn pops_highest_priority_first() {
        let sched: PriorityScheduler<u64, ()> = PriorityScheduler::new(4);
        sched.add_task(UpdateTask::new(VertexId(0), noop), 1.0);
        sched.add_task(UpdateTask::new(VertexId(1), noop), 4.0);
        sched.add_task(UpdateTask::new(VertexId(2), noop), 2.0);

        assert_eq!(expect_vertex(sched.get_next_task(0)), VertexId(1));
        assert_eq!(expect_vertex(sched.get_next_task(0)), VertexId(2));
        assert_eq!(expect_vertex(sched.get_next_task(0)), VertexId(0));
    }

    #[test]
    fn readd_takes_maximum_priority() {
        let sched: PriorityScheduler<u64, ()> = PriorityScheduler::new(4);
        sched.add_task(UpdateTask::new(VertexId(0), noop), 1.0);
        sched.add_task(UpdateTask::new(VertexId(1), noop), 2.0);
        // Promote vertex 0 above vertex 1; a stale entry remains behind.
        sched.add_task(UpdateTask::new(VertexId(0), noop), 3.0);

        assert_eq!(expect_vertex(sched.get_next_task(0)), VertexId(0));
        assert_eq!(expect_vertex(sched.get_next_task(0)), VertexId(1));
        assert!(matches!(sched.get_next_task(0), SchedStatus::Empty));
    }
}

//! Per-worker priority heaps with work stealing.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use graphmill_core::id::VertexId;

use super::priority::HeapEntry;
use super::support::{AddOutcome, VertexTaskSet};
use super::terminator::{TaskCountTerminator, Terminator};
use super::{Monitor, MonitorSlot, SchedStatus, Scheduler, WorkerId};
use crate::task::{UpdateFn, UpdateTask};

/// Multi-queue priority scheduler: one lazy heap per worker, tasks placed
/// by vertex id, stealing from other heaps when the local one runs dry.
pub struct MultiQueuePriorityScheduler<V, E> {
    heaps: Vec<Mutex<BinaryHeap<HeapEntry<V, E>>>>,
    tasks: VertexTaskSet<V, E>,
    terminator: TaskCountTerminator,
    monitor: MonitorSlot,
    seq: AtomicU64,
    num_vertices: usize,
}

impl<V, E> MultiQueuePriorityScheduler<V, E> {
    /// A scheduler with one heap per worker.
    pub fn new(num_vertices: usize, ncpus: usize) -> Self {
        MultiQueuePriorityScheduler {
            heaps: (0..ncpus.max(1)).map(|_| Mutex::new(BinaryHeap::new())).collect(),
            tasks: VertexTaskSet::new(num_vertices),
            terminator: TaskCountTerminator::new(),
            monitor: MonitorSlot::new(),
            seq: AtomicU64::new(0),
            num_vertices,
        }
    }

    fn push(&self, task: UpdateTask<V, E>, priority: f64) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let heap = task.vertex().index() % self.heaps.len();
        self.heaps[heap].lock().push(HeapEntry {
            priority,
            seq,
            task,
        });
    }
}

impl<V: 'static, E: 'static> Scheduler<V, E> for MultiQueuePriorityScheduler<V, E> {
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

    fn get_next_task(&self, worker: WorkerId) -> SchedStatus<V, E> {
        let n = self.heaps.len();
        for offset in 0..n {
            let h = (worker + offset) % n;
            loop {
                let entry = self.heaps[h].lock().pop();
                match entry {
                    None => break,
                    Some(entry) => {
                        if self.tasks.remove(entry.task.vertex(), entry.task.function()) {
                            return SchedStatus::NewTask(entry.task);
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

#[cfg(test)]
mod tests {
    use super::*;
    use graphmill_core::shared::SharedData;

    use crate::scheduler::TaskPoster;
    use crate::scope::VertexScope;

    fn noop(s: &mut VertexScope<'_, u64, ()>, _: &TaskPoster<'_, u64, ()>, _: &SharedData) {
        let _ = s.center();
    }

    #[test]
    fn local_heap_order_respects_priority() {
        let sched: MultiQueuePriorityScheduler<u64, ()> = MultiQueuePriorityScheduler::new(4, 2);
        // Vertices 0 and 2 both land in heap 0.
        sched.add_task(UpdateTask::new(VertexId(0), noop), 1.0);
        sched.add_task(UpdateTask::new(VertexId(2), noop), 9.0);

        match sched.get_next_task(0) {
            SchedStatus::NewTask(t) => assert_eq!(t.vertex(), VertexId(2)),
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn steals_when_local_heap_is_empty() {
        let sched: MultiQueuePriorityScheduler<u64, ()> = MultiQueuePriorityScheduler::new(4, 2);
        sched.add_task(UpdateTask::new(VertexId(1), noop), 1.0);

        // Vertex 1 lives in heap 1; worker 0 steals it.
        assert!(matches!(sched.get_next_task(0), SchedStatus::NewTask(_)));
        assert!(matches!(sched.get_next_task(0), SchedStatus::Empty));
    }
}

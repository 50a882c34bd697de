//! Single shared queue scheduler with deduplication.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use graphmill_core::id::VertexId;

use super::support::{AddOutcome, VertexTaskSet};
use super::terminator::{TaskCountTerminator, Terminator};
use super::{Monitor, MonitorSlot, SchedStatus, Scheduler, WorkerId};
use crate::task::{UpdateFn, UpdateTask};

/// FIFO scheduler: one queue shared by all workers.
///
/// A task enters the queue only on its first add; the per-vertex task set
/// tracks presence so that re-adds of a pending `(vertex, fn)` pair are
/// dropped and the queue never holds duplicates.
pub struct FifoScheduler<V, E> {
    queue: Mutex<VecDeque<UpdateTask<V, E>>>,
    tasks: VertexTaskSet<V, E>,
    terminator: TaskCountTerminator,
    monitor: MonitorSlot,
    num_vertices: usize,
}

impl<V, E> FifoScheduler<V, E> {
    /// A scheduler over a graph with `num_vertices` vertices.
    pub fn new(num_vertices: usize) -> Self {
        FifoScheduler {
            queue: Mutex::new(VecDeque::new()),
            tasks: VertexTaskSet::new(num_vertices),
            terminator: TaskCountTerminator::new(),
            monitor: MonitorSlot::new(),
            num_vertices,
        }
    }
}

impl<V: 'static, E: 'static> Scheduler<V, E> for FifoScheduler<V, E> {
    fn add_task(&self, task: UpdateTask<V, E>, priority: f64) {
        match self.tasks.add(task, priority).0 {
            AddOutcome::Added => {
                self.terminator.new_job();
                self.queue.lock().push_back(task);
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

    fn get_next_task(&self, _worker: WorkerId) -> SchedStatus<V, E> {
        loop {
            let task = self.queue.lock().pop_front();
            match task {
                None => return SchedStatus::Empty,
                Some(task) => {
                    if self.tasks.remove(task.vertex(), task.function()) {
                        return SchedStatus::NewTask(task);
                    }
                    // Stale entry; its pair was consumed elsewhere.
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

    fn expect_task(status: SchedStatus<u64, ()>) -> UpdateTask<u64, ()> {
        match status {
            SchedStatus::NewTask(t) => t,
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn hands_out_tasks_in_fifo_order() {
        let sched: FifoScheduler<u64, ()> = FifoScheduler::new(4);
        sched.add_task(UpdateTask::new(VertexId(2), noop), 1.0);
        sched.add_task(UpdateTask::new(VertexId(0), noop), 1.0);

        assert_eq!(expect_task(sched.get_next_task(0)).vertex(), VertexId(2));
        assert_eq!(expect_task(sched.get_next_task(0)).vertex(), VertexId(0));
        assert!(matches!(sched.get_next_task(0), SchedStatus::Empty));
    }

    #[test]
    fn deduplicates_pending_tasks() {
        let sched: FifoScheduler<u64, ()> = FifoScheduler::new(4);
        let task = UpdateTask::new(VertexId(1), noop as UpdateFn<u64, ()>);
        sched.add_task(task, 1.0);
        sched.add_task(task, 2.0);
        sched.add_task(task, 0.5);

        let got = expect_task(sched.get_next_task(0));
        assert_eq!(got, task);
        assert!(matches!(sched.get_next_task(0), SchedStatus::Empty));

        // Once handed out, the pair may be scheduled again.
        sched.add_task(task, 1.0);
        assert_eq!(expect_task(sched.get_next_task(0)), task);
    }

    #[test]
    fn terminator_finishes_after_completions() {
        let sched: FifoScheduler<u64, ()> = FifoScheduler::new(2);
        sched.add_task_to_all(noop, 1.0);
        assert!(!sched.terminator().finished());

        let a = expect_task(sched.get_next_task(0));
        let b = expect_task(sched.get_next_task(1));
        assert!(!sched.terminator().finished());

        sched.completed_task(0, &a);
        sched.completed_task(1, &b);
        assert!(sched.terminator().finished());
    }
}

//! Sampling scheduler: draws the next vertex at random, weighted by the
//! top priority of its pending tasks.

use std::sync::Arc;

use rand::Rng;

use graphmill_core::id::VertexId;

use super::support::{AddOutcome, FastMultinomial, VertexTaskSet};
use super::terminator::{TaskCountTerminator, Terminator};
use super::{Monitor, MonitorSlot, SchedStatus, Scheduler, WorkerId};
use crate::task::{UpdateFn, UpdateTask};

/// Priority-weighted random scheduler.
///
/// The multinomial holds one weight per vertex: the top priority of that
/// vertex's pending tasks, or zero when none are pending. A draw that
/// races a concurrent pop simply resamples. When the multinomial is empty
/// but tasks remain in flight the scheduler reports `Waiting`; only the
/// terminator decides actual completion.
pub struct SamplingScheduler<V, E> {
    multinomial: FastMultinomial,
    tasks: VertexTaskSet<V, E>,
    terminator: TaskCountTerminator,
    monitor: MonitorSlot,
    num_vertices: usize,
}

impl<V, E> SamplingScheduler<V, E> {
    /// A scheduler over a graph with `num_vertices` vertices.
    pub fn new(num_vertices: usize) -> Self {
        SamplingScheduler {
            multinomial: FastMultinomial::new(num_vertices.max(1)),
            tasks: VertexTaskSet::new(num_vertices),
            terminator: TaskCountTerminator::new(),
            monitor: MonitorSlot::new(),
            num_vertices,
        }
    }
}

impl<V: 'static, E: 'static> Scheduler<V, E> for SamplingScheduler<V, E> {
    fn add_task(&self, task: UpdateTask<V, E>, priority: f64) {
        if priority <= 0.0 {
            tracing::warn!(
                vertex = task.vertex().0,
                priority,
                "sampling scheduler requires positive priorities; task dropped"
            );
            return;
        }
        let (outcome, top) = self.tasks.add(task, priority);
        match outcome {
            AddOutcome::Added => {
                self.terminator.new_job();
                self.monitor.added(task.vertex(), priority);
            }
            AddOutcome::Promoted => self.monitor.promoted(task.vertex(), priority),
            AddOutcome::Unchanged => {}
        }
        self.multinomial.set(task.vertex().index(), top);
    }

    fn add_task_to_all(&self, func: UpdateFn<V, E>, priority: f64) {
        for v in 0..self.num_vertices {
            self.add_task(UpdateTask::new(VertexId(v as u32), func), priority);
        }
    }

    fn get_next_task(&self, _worker: WorkerId) -> SchedStatus<V, E> {
        if self.terminator.finished() {
            return SchedStatus::Empty;
        }
        let mut rng = rand::thread_rng();
        loop {
            match self.multinomial.sample(rng.gen::<f64>()) {
                None => {
                    // Nothing sampleable; work may still be in flight.
                    return if self.terminator.finished() {
                        SchedStatus::Empty
                    } else {
                        SchedStatus::Waiting
                    };
                }
                Some(slot) => {
                    let vertex = VertexId(slot as u32);
                    if let Some((task, _, remaining)) = self.tasks.pop_top(vertex) {
                        self.multinomial.set(slot, remaining);
                        return SchedStatus::NewTask(task);
                    }
                    // Lost the race for this vertex's tasks; clear and redraw.
                    self.multinomial.set(slot, 0.0);
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

    #[test]
    fn drains_all_positive_priority_tasks() {
        let sched: SamplingScheduler<u64, ()> = SamplingScheduler::new(8);
        sched.add_task_to_all(noop, 2.0);

        let mut seen = std::collections::HashSet::new();
        loop {
            match sched.get_next_task(0) {
                SchedStatus::NewTask(t) => {
                    seen.insert(t.vertex());
                    sched.completed_task(0, &t);
                }
                SchedStatus::Empty => break,
                SchedStatus::Waiting => unreachable!("no task is in flight"),
            }
        }
        assert_eq!(seen.len(), 8);
        assert!(sched.terminator().finished());
    }

    #[test]
    fn drops_non_positive_priorities() {
        let sched: SamplingScheduler<u64, ()> = SamplingScheduler::new(4);
        sched.add_task(UpdateTask::new(VertexId(0), noop), 0.0);
        sched.add_task(UpdateTask::new(VertexId(1), noop), -1.0);
        assert!(matches!(sched.get_next_task(0), SchedStatus::Empty));
        assert!(sched.terminator().finished());
    }

    #[test]
    fn waiting_while_a_task_is_in_flight() {
        let sched: SamplingScheduler<u64, ()> = SamplingScheduler::new(2);
        sched.add_task(UpdateTask::new(VertexId(0), noop), 1.0);

        let task = match sched.get_next_task(0) {
            SchedStatus::NewTask(t) => t,
            _ => panic!("expected a task"),
        };
        // Multinomial is empty but the task has not completed.
        assert!(matches!(sched.get_next_task(1), SchedStatus::Waiting));

        sched.completed_task(0, &task);
        assert!(matches!(sched.get_next_task(1), SchedStatus::Empty));
    }
}

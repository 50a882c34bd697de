//! Sweep scheduler: workers visit an ordered slice of the vertex set
//! cyclically, running whatever tasks are pending at each stop.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use graphmill_core::id::VertexId;

use super::support::{AddOutcome, VertexTaskSet};
use super::terminator::{TaskCountTerminator, Terminator};
use super::{Monitor, MonitorSlot, SchedStatus, Scheduler, WorkerId};
use crate::task::{UpdateFn, UpdateTask};

/// Sweep scheduler.
///
/// Worker `w` owns the vertices at positions `w, w + ncpus, ...` of a
/// fixed visit order (vertex id order, or a seeded permutation when
/// `permute=true`). `get_next_task` advances the worker's cursor through
/// its stride until a vertex with pending tasks is found; a full fruitless
/// lap reports `Empty`.
pub struct SweepScheduler<V, E> {
    order: Vec<VertexId>,
    cursors: Vec<Mutex<usize>>,
    tasks: VertexTaskSet<V, E>,
    terminator: TaskCountTerminator,
    monitor: MonitorSlot,
    ncpus: usize,
}

impl<V, E> SweepScheduler<V, E> {
    /// A sweep over `num_vertices` vertices; `permute_seed` shuffles the
    /// visit order deterministically when present.
    pub fn new(num_vertices: usize, ncpus: usize, permute_seed: Option<u64>) -> Self {
        let mut order: Vec<VertexId> = (0..num_vertices as u32).map(VertexId).collect();
        if let Some(seed) = permute_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }
        let ncpus = ncpus.max(1);
        SweepScheduler {
            order,
            cursors: (0..ncpus).map(|_| Mutex::new(0)).collect(),
            tasks: VertexTaskSet::new(num_vertices),
            terminator: TaskCountTerminator::new(),
            monitor: MonitorSlot::new(),
            ncpus,
        }
    }

    /// Number of visit positions owned by `worker`.
    fn stride_len(&self, worker: WorkerId) -> usize {
        let n = self.order.len();
        if worker < n {
            (n - worker).div_ceil(self.ncpus)
        } else {
            0
        }
    }
}

impl<V: 'static, E: 'static> Scheduler<V, E> for SweepScheduler<V, E> {
    fn add_task(&self, task: UpdateTask<V, E>, priority: f64) {
        match self.tasks.add(task, priority).0 {
            AddOutcome::Added => {
                self.terminator.new_job();
                self.monitor.added(task.vertex(), priority);
            }
            AddOutcome::Promoted => self.monitor.promoted(task.vertex(), priority),
            AddOutcome::Unchanged => {}
        }
    }

    fn add_task_to_all(&self, func: UpdateFn<V, E>, priority: f64) {
        for v in 0..self.order.len() {
            self.add_task(UpdateTask::new(VertexId(v as u32), func), priority);
        }
    }

    fn get_next_task(&self, worker: WorkerId) -> SchedStatus<V, E> {
        let stride = self.stride_len(worker);
        if stride == 0 {
            return SchedStatus::Empty;
        }
        let mut cursor = self.cursors[worker].lock();
        for _ in 0..stride {
            let position = worker + *cursor * self.ncpus;
            *cursor = (*cursor + 1) % stride;
            let vertex = self.order[position];
            if let Some((task, _, _)) = self.tasks.pop_top(vertex) {
                return SchedStatus::NewTask(task);
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
    fn single_worker_visits_in_vertex_order() {
        let sched: SweepScheduler<u64, ()> = SweepScheduler::new(4, 1, None);
        sched.add_task_to_all(noop, 1.0);

        let mut seen = Vec::new();
        while let SchedStatus::NewTask(t) = sched.get_next_task(0) {
            seen.push(t.vertex());
            sched.completed_task(0, &t);
        }
        assert_eq!(
            seen,
            vec![VertexId(0), VertexId(1), VertexId(2), VertexId(3)]
        );
        assert!(sched.terminator().finished());
    }

    #[test]
    fn workers_cover_disjoint_strides() {
        let sched: SweepScheduler<u64, ()> = SweepScheduler::new(5, 2, None);
        sched.add_task_to_all(noop, 1.0);

        let mut w0 = Vec::new();
        while let SchedStatus::NewTask(t) = sched.get_next_task(0) {
            w0.push(t.vertex());
            sched.completed_task(0, &t);
        }
        // Worker 0 owns positions 0, 2, 4.
        assert_eq!(w0, vec![VertexId(0), VertexId(2), VertexId(4)]);

        let mut w1 = Vec::new();
        while let SchedStatus::NewTask(t) = sched.get_next_task(1) {
            w1.push(t.vertex());
            sched.completed_task(1, &t);
        }
        assert_eq!(w1, vec![VertexId(1), VertexId(3)]);
        assert!(sched.terminator().finished());
    }

    #[test]
    fn permutation_is_deterministic_for_a_seed() {
        let a: SweepScheduler<u64, ()> = SweepScheduler::new(16, 1, Some(7));
        let b: SweepScheduler<u64, ()> = SweepScheduler::new(16, 1, Some(7));
        assert_eq!(a.order, b.order);
        let c: SweepScheduler<u64, ()> = SweepScheduler::new(16, 1, Some(8));
        assert_ne!(a.order, c.order);
    }
}

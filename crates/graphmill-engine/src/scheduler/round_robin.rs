//! Round-robin scheduler: fixed passes over the vertex set in id order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use graphmill_core::id::VertexId;

use super::terminator::{ControlledTerminator, Terminator};
use super::{Monitor, MonitorSlot, SchedStatus, Scheduler, WorkerId};
use crate::task::{UpdateFn, UpdateTask};

struct BlockSlot {
    base: u64,
    offset: u64,
}

/// Round-robin scheduler.
///
/// Tasks are implicit: one update function applied to vertices
/// `start_vertex, start_vertex + 1, ...` (mod V), for `max_iterations`
/// full passes (`0` means unbounded). Workers claim blocks of
/// `block_size` consecutive positions from a shared counter to keep the
/// hot path off the atomic.
pub struct RoundRobinScheduler<V, E> {
    counter: AtomicU64,
    slots: Vec<Mutex<BlockSlot>>,
    start_vertex: u64,
    block_size: u64,
    max_iterations: u64,
    update_fn: Mutex<Option<UpdateFn<V, E>>>,
    terminator: ControlledTerminator,
    monitor: MonitorSlot,
    num_vertices: u64,
}

impl<V, E> RoundRobinScheduler<V, E> {
    /// A scheduler over `num_vertices` vertices.
    pub fn new(
        num_vertices: usize,
        ncpus: usize,
        start_vertex: u64,
        max_iterations: u64,
        block_size: u64,
    ) -> Self {
        let block_size = block_size.max(1);
        RoundRobinScheduler {
            counter: AtomicU64::new(0),
            slots: (0..ncpus.max(1))
                .map(|_| {
                    Mutex::new(BlockSlot {
                        base: 0,
                        offset: block_size,
                    })
                })
                .collect(),
            start_vertex,
            block_size,
            max_iterations,
            update_fn: Mutex::new(None),
            terminator: ControlledTerminator::new(),
            monitor: MonitorSlot::new(),
            num_vertices: num_vertices as u64,
        }
    }
}

impl<V: 'static, E: 'static> Scheduler<V, E> for RoundRobinScheduler<V, E> {
    fn start(&self) {
        self.counter.store(0, Ordering::SeqCst);
        for slot in &self.slots {
            let mut slot = slot.lock();
            slot.base = 0;
            slot.offset = self.block_size;
        }
        self.terminator.reset();
        if self.update_fn.lock().is_none() {
            tracing::warn!("round-robin scheduler started without an update function");
            self.terminator.complete();
        }
    }

    /// The round-robin schedule has no per-vertex tasks; adding a task
    /// fixes the update function applied to every vertex.
    fn add_task(&self, task: UpdateTask<V, E>, _priority: f64) {
        *self.update_fn.lock() = Some(task.function());
    }

    fn add_task_to_all(&self, func: UpdateFn<V, E>, _priority: f64) {
        *self.update_fn.lock() = Some(func);
    }

    fn get_next_task(&self, worker: WorkerId) -> SchedStatus<V, E> {
        if self.num_vertices == 0 {
            self.terminator.complete();
            return SchedStatus::Empty;
        }
        let update_fn = match *self.update_fn.lock() {
            Some(f) => f,
            None => return SchedStatus::Empty,
        };

        let mut slot = self.slots[worker % self.slots.len()].lock();
        if slot.offset == self.block_size {
            slot.base = self.counter.fetch_add(self.block_size, Ordering::SeqCst);
            slot.offset = 0;
        }
        let index = slot.base + slot.offset;
        slot.offset += 1;

        if self.max_iterations > 0 && index >= self.num_vertices * self.max_iterations {
            self.terminator.complete();
            return SchedStatus::Empty;
        }
        let vertex = VertexId(((self.start_vertex + index) % self.num_vertices) as u32);
        SchedStatus::NewTask(UpdateTask::new(vertex, update_fn))
    }

    fn completed_task(&self, _worker: WorkerId, task: &UpdateTask<V, E>) {
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
    fn visits_each_vertex_per_pass_from_start_vertex() {
        let sched: RoundRobinScheduler<u64, ()> = RoundRobinScheduler::new(3, 1, 1, 2, 1);
        Scheduler::<u64, ()>::add_task_to_all(&sched, noop, 1.0);
        sched.start();

        let mut seen = Vec::new();
        loop {
            match sched.get_next_task(0) {
                SchedStatus::NewTask(t) => {
                    seen.push(t.vertex().0);
                    sched.completed_task(0, &t);
                }
                SchedStatus::Empty => {
                    if Scheduler::<u64, ()>::terminator(&sched).finished() {
                        break;
                    }
                }
                SchedStatus::Waiting => {}
            }
        }
        assert_eq!(seen, vec![1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn block_claims_cover_everything_exactly_once_per_pass() {
        let sched: RoundRobinScheduler<u64, ()> = RoundRobinScheduler::new(8, 2, 0, 1, 4);
        Scheduler::<u64, ()>::add_task_to_all(&sched, noop, 1.0);
        sched.start();

        let mut counts = vec![0u32; 8];
        for worker in [0usize, 1] {
            loop {
                match sched.get_next_task(worker) {
                    SchedStatus::NewTask(t) => {
                        counts[t.vertex().index()] += 1;
                        sched.completed_task(worker, &t);
                    }
                    _ => break,
                }
            }
        }
        assert_eq!(counts, vec![1; 8]);
    }
}

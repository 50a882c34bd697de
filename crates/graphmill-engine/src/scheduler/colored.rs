//! Colored scheduler: executes the graph one color block at a time.
//!
//! Tasks are implicit. Pass `i` processes the `i mod C`-th color block;
//! within a block, worker `w` visits the block's vertices at stride
//! `ncpus` starting from offset `w`. Because a valid coloring never places
//! two adjacent vertices in the same block, all vertices in flight at any
//! instant are mutually non-adjacent.
//!
//! A global color counter and per-worker `(waiting, observed_color)` state
//! coordinate block changes: a worker that exhausts its slice marks itself
//! waiting, and the last worker to wait advances the counter, releasing
//! everyone into the next block. After `max_iterations` passes over all
//! colors the terminator completes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use graphmill_core::graph::DirectedGraph;
use graphmill_core::id::VertexId;

use super::terminator::{ControlledTerminator, Terminator};
use super::{Monitor, MonitorSlot, SchedStatus, Scheduler, WorkerId};
use crate::error::EngineError;
use crate::task::{UpdateFn, UpdateTask};

struct WorkerSlot {
    /// Offset into the current color block.
    index: usize,
    /// Color counter value this worker is executing.
    color: usize,
    waiting: bool,
}

/// Scheduler driven by a validated graph coloring.
pub struct ColoredScheduler<V, E> {
    color_blocks: Vec<Vec<VertexId>>,
    workers: Vec<Mutex<WorkerSlot>>,
    /// Monotonic pass counter; `color % num_blocks` is the active block.
    color: AtomicUsize,
    waiting: AtomicUsize,
    max_iterations: u64,
    update_fn: Mutex<Option<UpdateFn<V, E>>>,
    terminator: ControlledTerminator,
    monitor: MonitorSlot,
    ncpus: usize,
}

impl<V, E> ColoredScheduler<V, E> {
    /// Builds the color blocks from the graph's coloring.
    ///
    /// The graph must be finalized with a valid coloring; both are
    /// topology errors, fatal before any worker starts.
    pub fn new(
        graph: &DirectedGraph<V, E>,
        ncpus: usize,
        max_iterations: u64,
    ) -> Result<Self, EngineError> {
        if !graph.is_finalized() {
            return Err(graphmill_core::error::CoreError::NotFinalized.into());
        }
        if !graph.valid_coloring() {
            // Surface the offending edge.
            for e in 0..graph.num_edges() as u32 {
                let edge = graphmill_core::id::EdgeId(e);
                let src = graph.source(edge)?;
                let dst = graph.target(edge)?;
                let color = graph.color(src)?;
                if color == graph.color(dst)? {
                    return Err(graphmill_core::error::CoreError::InvalidColoring {
                        edge,
                        color,
                    }
                    .into());
                }
            }
        }
        let mut color_blocks: Vec<Vec<VertexId>> = Vec::new();
        for v in 0..graph.num_vertices() as u32 {
            let vertex = VertexId(v);
            let color = graph.color(vertex)?.0 as usize;
            if color >= color_blocks.len() {
                color_blocks.resize_with(color + 1, Vec::new);
            }
            color_blocks[color].push(vertex);
        }
        let ncpus = ncpus.max(1);
        Ok(ColoredScheduler {
            color_blocks,
            workers: (0..ncpus)
                .map(|w| {
                    Mutex::new(WorkerSlot {
                        index: w,
                        color: usize::MAX,
                        waiting: true,
                    })
                })
                .collect(),
            color: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            max_iterations,
            update_fn: Mutex::new(None),
            terminator: ControlledTerminator::new(),
            monitor: MonitorSlot::new(),
            ncpus,
        })
    }

    /// Vertices per color, for inspection.
    pub fn num_color_blocks(&self) -> usize {
        self.color_blocks.len()
    }
}

impl<V: 'static, E: 'static> Scheduler<V, E> for ColoredScheduler<V, E> {
    fn start(&self) {
        for (w, slot) in self.workers.iter().enumerate() {
            let mut slot = slot.lock();
            slot.index = w;
            slot.color = usize::MAX;
            slot.waiting = true;
        }
        self.waiting.store(0, Ordering::SeqCst);
        self.color.store(0, Ordering::SeqCst);
        self.terminator.reset();
        if self.update_fn.lock().is_none() {
            tracing::warn!("colored scheduler started without an update function");
            self.terminator.complete();
        }
    }

    /// The colored schedule has no per-vertex tasks; adding a task fixes
    /// the update function applied to every vertex.
    fn add_task(&self, task: UpdateTask<V, E>, _priority: f64) {
        *self.update_fn.lock() = Some(task.function());
    }

    fn add_task_to_all(&self, func: UpdateFn<V, E>, _priority: f64) {
        *self.update_fn.lock() = Some(func);
    }

    fn get_next_task(&self, worker: WorkerId) -> SchedStatus<V, E> {
        let num_blocks = self.color_blocks.len();
        if num_blocks == 0 {
            self.terminator.complete();
            return SchedStatus::Empty;
        }
        let update_fn = match *self.update_fn.lock() {
            Some(f) => f,
            None => return SchedStatus::Empty,
        };

        let mut slot = self.workers[worker].lock();
        if slot.waiting {
            let global = self.color.load(Ordering::SeqCst);
            if slot.color == global {
                // Nothing changed; still waiting for the block to turn.
                return SchedStatus::Empty;
            }
            slot.color = global;
            slot.index = worker;
            slot.waiting = false;
        } else {
            slot.index += self.ncpus;
        }

        if slot.color as u64 / num_blocks as u64 >= self.max_iterations {
            self.terminator.complete();
            return SchedStatus::Empty;
        }

        let block = &self.color_blocks[slot.color % num_blocks];
        if slot.index < block.len() {
            return SchedStatus::NewTask(UpdateTask::new(block[slot.index], update_fn));
        }

        // Slice exhausted: wait; the last worker in advances the color.
        slot.waiting = true;
        let now_waiting = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        if now_waiting == self.ncpus {
            self.waiting.store(0, Ordering::SeqCst);
            self.color.fetch_add(1, Ordering::SeqCst);
        }
        SchedStatus::Empty
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
    use graphmill_core::id::Color;
    use graphmill_core::shared::SharedData;

    use crate::scheduler::TaskPoster;
    use crate::scope::VertexScope;

    fn noop(s: &mut VertexScope<'_, u64, ()>, _: &TaskPoster<'_, u64, ()>, _: &SharedData) {
        let _ = s.center();
    }

    fn two_colored_chain() -> DirectedGraph<u64, ()> {
        let mut g = DirectedGraph::new();
        for i in 0..4u32 {
            let v = g.add_vertex(0).unwrap();
            g.set_color(v, Color(i % 2)).unwrap();
        }
        for i in 0..3u32 {
            g.add_edge(VertexId(i), VertexId(i + 1), ()).unwrap();
        }
        g.finalize_colored().unwrap();
        g
    }

    #[test]
    fn rejects_invalid_coloring() {
        let mut g: DirectedGraph<u64, ()> = DirectedGraph::new();
        g.add_vertex(0).unwrap();
        g.add_vertex(0).unwrap();
        g.add_edge(VertexId(0), VertexId(1), ()).unwrap();
        g.finalize();
        assert!(matches!(
            ColoredScheduler::new(&g, 1, 1),
            Err(EngineError::Core(
                graphmill_core::error::CoreError::InvalidColoring { .. }
            ))
        ));
    }

    #[test]
    fn single_worker_runs_blocks_in_color_order() {
        let g = two_colored_chain();
        let sched = ColoredScheduler::new(&g, 1, 1).unwrap();
        Scheduler::<u64, ()>::add_task_to_all(&sched, noop, 1.0);
        sched.start();

        let mut seen = Vec::new();
        loop {
            match Scheduler::<u64, ()>::get_next_task(&sched, 0) {
                SchedStatus::NewTask(t) => {
                    seen.push(t.vertex());
                    Scheduler::<u64, ()>::completed_task(&sched, 0, &t);
                }
                SchedStatus::Empty => {
                    if Scheduler::<u64, ()>::terminator(&sched).finished() {
                        break;
                    }
                }
                SchedStatus::Waiting => {}
            }
        }
        // Color 0 block {0, 2} before color 1 block {1, 3}.
        assert_eq!(
            seen,
            vec![VertexId(0), VertexId(2), VertexId(1), VertexId(3)]
        );
    }

    #[test]
    fn max_iterations_bounds_the_pass_count() {
        let g = two_colored_chain();
        let sched = ColoredScheduler::new(&g, 1, 3).unwrap();
        Scheduler::<u64, ()>::add_task_to_all(&sched, noop, 1.0);
        sched.start();

        let mut count = 0;
        loop {
            match Scheduler::<u64, ()>::get_next_task(&sched, 0) {
                SchedStatus::NewTask(t) => {
                    count += 1;
                    Scheduler::<u64, ()>::completed_task(&sched, 0, &t);
                }
                SchedStatus::Empty => {
                    if Scheduler::<u64, ()>::terminator(&sched).finished() {
                        break;
                    }
                }
                SchedStatus::Waiting => {}
            }
        }
        assert_eq!(count, 4 * 3);
    }
}

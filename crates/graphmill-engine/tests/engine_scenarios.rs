//! End-to-end engine scenarios: full engine + scheduler + scope runs over
//! small graphs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use graphmill_core::config::EngineConfig;
use graphmill_core::graph::DirectedGraph;
use graphmill_core::id::VertexId;
use graphmill_core::shared::SharedData;

use graphmill_engine::{create_engine, ExecutionStatus, TaskPoster, VertexScope};

fn isolated_vertices(n: u32) -> DirectedGraph<u64, ()> {
    let mut g = DirectedGraph::new();
    for _ in 0..n {
        g.add_vertex(0).unwrap();
    }
    g.finalize();
    g
}

fn chain(n: u32) -> DirectedGraph<u64, ()> {
    let mut g = DirectedGraph::new();
    for _ in 0..n {
        g.add_vertex(0).unwrap();
    }
    for i in 0..n - 1 {
        g.add_edge(VertexId(i), VertexId(i + 1), ()).unwrap();
    }
    g.finalize();
    g
}

fn increment(
    scope: &mut VertexScope<'_, u64, ()>,
    _poster: &TaskPoster<'_, u64, ()>,
    _data: &SharedData,
) {
    *scope.vertex_data_mut().unwrap() += 1;
}

#[test]
fn fifo_counts_each_vertex_exactly_once() {
    let config = EngineConfig::default()
        .with_ncpus(2)
        .with_scheduler("fifo")
        .unwrap()
        .with_scope("vertex")
        .unwrap();
    let mut engine = create_engine(isolated_vertices(4), &config).unwrap();

    engine.add_task_to_all(increment, 1.0);
    let status = engine.start().unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(engine.last_update_count(), 4);
    for v in 0..4 {
        assert_eq!(*engine.graph().vertex_data(VertexId(v)).unwrap(), 1);
    }
}

fn propagate_depth(
    scope: &mut VertexScope<'_, u64, ()>,
    poster: &TaskPoster<'_, u64, ()>,
    _data: &SharedData,
) {
    let current = *scope.vertex_data().unwrap();
    let mut best = current;
    for &e in scope.in_edge_ids() {
        let src = scope.source(e).unwrap();
        let upstream = *scope.neighbor_data(src).unwrap();
        if upstream > 0 {
            best = best.max(upstream + 1);
        }
    }
    if best != current {
        *scope.vertex_data_mut().unwrap() = best;
        for &e in scope.out_edge_ids() {
            let dst = scope.target(e).unwrap();
            poster.schedule(dst, propagate_depth, 1.0);
        }
    }
}

#[test]
fn priority_chain_converges_to_depths() {
    // Chain 0 -> 1 -> 2 -> 3 seeded with depth 1 at vertex 0; the stable
    // fixpoint is {1, 2, 3, 4} regardless of scheduling order.
    for ncpus in [1, 4] {
        let mut graph = chain(4);
        *graph.vertex_data_mut(VertexId(0)).unwrap() = 1;

        let config = EngineConfig::default()
            .with_ncpus(ncpus)
            .with_scheduler("priority")
            .unwrap()
            .with_scope("edge")
            .unwrap();
        let mut engine = create_engine(graph, &config).unwrap();

        for (v, priority) in [(0u32, 4.0), (1, 3.0), (2, 2.0), (3, 1.0)] {
            engine.add_task(VertexId(v), propagate_depth, priority);
        }
        let status = engine.start().unwrap();

        assert_eq!(status, ExecutionStatus::Completed);
        for (v, expected) in [(0u32, 1u64), (1, 2), (2, 3), (3, 4)] {
            assert_eq!(
                *engine.graph().vertex_data(VertexId(v)).unwrap(),
                expected,
                "vertex {v} with {ncpus} workers"
            );
        }
    }
}

struct ActivityFlags {
    active: Vec<AtomicBool>,
    conflict: AtomicBool,
}

fn probe_neighbors(
    scope: &mut VertexScope<'_, u64, ()>,
    _poster: &TaskPoster<'_, u64, ()>,
    data: &SharedData,
) {
    let flags = data.get::<ActivityFlags>().unwrap();
    let me = scope.center().index();
    flags.active[me].store(true, Ordering::SeqCst);
    // Under a colored schedule no adjacent vertex may be in flight.
    for n in scope.neighbor_ids() {
        if flags.active[n.index()].load(Ordering::SeqCst) {
            flags.conflict.store(true, Ordering::SeqCst);
        }
    }
    thread::sleep(Duration::from_micros(200));
    flags.active[me].store(false, Ordering::SeqCst);
}

#[test]
fn colored_schedule_never_overlaps_adjacent_vertices() {
    // 5-cycle: a valid 3-coloring exists; 4 workers, two full passes.
    let mut g: DirectedGraph<u64, ()> = DirectedGraph::new();
    for _ in 0..5 {
        g.add_vertex(0).unwrap();
    }
    for i in 0..5u32 {
        g.add_edge(VertexId(i), VertexId((i + 1) % 5), ()).unwrap();
    }
    g.greedy_color().unwrap();
    g.finalize_colored().unwrap();

    let config = EngineConfig::default()
        .with_ncpus(4)
        .with_scheduler("colored(max_iterations=2)")
        .unwrap()
        .with_scope("none")
        .unwrap();
    let mut engine = create_engine(g, &config).unwrap();
    engine.shared_data_mut().insert(ActivityFlags {
        active: (0..5).map(|_| AtomicBool::new(false)).collect(),
        conflict: AtomicBool::new(false),
    });

    engine.add_task_to_all(probe_neighbors, 1.0);
    let status = engine.start().unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(engine.last_update_count(), 10);
    let flags = engine.shared_data_mut().get::<ActivityFlags>().unwrap();
    assert!(!flags.conflict.load(Ordering::SeqCst));
}

fn reschedule_self(
    scope: &mut VertexScope<'_, u64, ()>,
    poster: &TaskPoster<'_, u64, ()>,
    _data: &SharedData,
) {
    *scope.vertex_data_mut().unwrap() += 1;
    poster.schedule(scope.center(), reschedule_self, 1.0);
}

#[test]
fn timeout_interrupts_a_livelocked_schedule() {
    let config = EngineConfig::default()
        .with_ncpus(2)
        .with_scheduler("fifo")
        .unwrap()
        .with_scope("vertex")
        .unwrap()
        .with_timeout(Duration::from_secs(1));
    let mut engine = create_engine(isolated_vertices(2), &config).unwrap();

    engine.add_task(VertexId(0), reschedule_self, 1.0);
    let status = engine.start().unwrap();

    assert_eq!(status, ExecutionStatus::Timeout);
    assert!(engine.elapsed_time() >= Duration::from_millis(1000));
    assert!(engine.last_update_count() > 0);
}

#[test]
fn task_budget_bounds_the_run() {
    let config = EngineConfig::default()
        .with_ncpus(1)
        .with_scheduler("fifo")
        .unwrap()
        .with_scope("vertex")
        .unwrap()
        .with_task_budget(50);
    let mut engine = create_engine(isolated_vertices(1), &config).unwrap();

    engine.add_task(VertexId(0), reschedule_self, 1.0);
    let status = engine.start().unwrap();

    assert_eq!(status, ExecutionStatus::BudgetExceeded);
    assert_eq!(engine.last_update_count(), 51);
}

#[test]
fn stop_interrupts_and_is_idempotent() {
    let config = EngineConfig::default()
        .with_ncpus(2)
        .with_scheduler("fifo")
        .unwrap()
        .with_scope("vertex")
        .unwrap();
    let mut engine = create_engine(isolated_vertices(2), &config).unwrap();
    engine.add_task(VertexId(0), reschedule_self, 1.0);

    let handle = engine.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.stop();
        handle.stop();
    });

    let status = engine.start().unwrap();
    stopper.join().unwrap();
    assert_eq!(status, ExecutionStatus::ForcedStop);
}

fn fired(data: &SharedData) -> bool {
    data.get::<AtomicBool>()
        .map(|b| b.load(Ordering::SeqCst))
        .unwrap_or(false)
}

fn arm_term_flag(
    scope: &mut VertexScope<'_, u64, ()>,
    poster: &TaskPoster<'_, u64, ()>,
    data: &SharedData,
) {
    *scope.vertex_data_mut().unwrap() += 1;
    if *scope.vertex_data().unwrap() > 20 {
        if let Some(flag) = data.get::<AtomicBool>() {
            flag.store(true, Ordering::SeqCst);
        }
    }
    poster.schedule(scope.center(), arm_term_flag, 1.0);
}

#[test]
fn termination_function_stops_the_engine() {
    let config = EngineConfig::default()
        .with_ncpus(2)
        .with_scheduler("fifo")
        .unwrap()
        .with_scope("vertex")
        .unwrap()
        .with_timeout(Duration::from_secs(20));
    let mut engine = create_engine(isolated_vertices(1), &config).unwrap();
    engine.shared_data_mut().insert(AtomicBool::new(false));
    engine.add_termination_fn(fired);

    engine.add_task(VertexId(0), arm_term_flag, 1.0);
    let status = engine.start().unwrap();
    assert_eq!(status, ExecutionStatus::TermFunction);
}

fn bump(
    scope: &mut VertexScope<'_, u64, ()>,
    _poster: &TaskPoster<'_, u64, ()>,
    data: &SharedData,
) {
    *scope.vertex_data_mut().unwrap() += 1;
    if let Some(counter) = data.get::<AtomicU64>() {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn synchronous_engine_runs_fixed_rounds() {
    let config = EngineConfig::default()
        .with_ncpus(2)
        .with_engine_type("synchronous")
        .unwrap()
        .with_scheduler("fifo(max_iterations=2)")
        .unwrap()
        .with_scope("vertex")
        .unwrap();
    let mut engine = create_engine(isolated_vertices(3), &config).unwrap();
    engine.shared_data_mut().insert(AtomicU64::new(0));

    engine.add_task_to_all(bump, 1.0);
    let status = engine.start().unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(engine.last_update_count(), 6);
    for v in 0..3 {
        assert_eq!(*engine.graph().vertex_data(VertexId(v)).unwrap(), 2);
    }
}

#[test]
fn multiqueue_engine_completes_scenario_a() {
    let config = EngineConfig::default()
        .with_ncpus(4)
        .with_scheduler("multiqueue_fifo")
        .unwrap()
        .with_scope("vertex")
        .unwrap();
    let mut engine = create_engine(isolated_vertices(16), &config).unwrap();

    engine.add_task_to_all(increment, 1.0);
    assert_eq!(engine.start().unwrap(), ExecutionStatus::Completed);
    assert_eq!(engine.last_update_count(), 16);
}

#[test]
fn unknown_scheduler_fails_before_start() {
    let config = EngineConfig::default().with_scheduler("mystery").unwrap();
    assert!(create_engine(isolated_vertices(2), &config).is_err());
}

//! The scope factory: turns `(worker, vertex, range)` into a locked scope.
//!
//! One deferred RW lock per vertex. Locks are always acquired in ascending
//! vertex id order, which makes the acquisition deadlock-free, and released
//! in reverse order. A request the lock cannot grant immediately parks the
//! calling worker on a per-request event; every request freed by a release
//! is forwarded by signalling its event.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use graphmill_core::config::ScopeRange;
use graphmill_core::deferred_rwlock::{DeferredRwLock, Granted, LockKind};
use graphmill_core::graph::DirectedGraph;
use graphmill_core::id::VertexId;

use super::{DataTables, VertexScope};
use crate::scheduler::WorkerId;

/// Event a worker parks on while its lock request sits in a queue.
struct Waiter {
    granted: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    fn new() -> Arc<Self> {
        Arc::new(Waiter {
            granted: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn grant(&self) {
        let mut granted = self.granted.lock();
        *granted = true;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cond.wait(&mut granted);
        }
    }
}

/// Issues and releases per-vertex consistency scopes.
pub struct ScopeFactory<'g, V, E> {
    graph: &'g DirectedGraph<V, E>,
    tables: DataTables<V, E>,
    locks: Vec<DeferredRwLock<Arc<Waiter>>>,
    default_range: ScopeRange,
}

impl<'g, V: Clone, E: Clone> ScopeFactory<'g, V, E> {
    /// Creates a factory over a finalized graph, taking ownership of the
    /// payload tables for the duration of the run.
    pub fn new(
        graph: &'g DirectedGraph<V, E>,
        vertices: Vec<V>,
        edges: Vec<E>,
        default_range: ScopeRange,
    ) -> Self {
        let locks = (0..graph.num_vertices())
            .map(|_| DeferredRwLock::new())
            .collect();
        ScopeFactory {
            graph,
            tables: DataTables::new(vertices, edges),
            locks,
            default_range,
        }
    }

    /// Changes the range used by [`get_scope`](Self::get_scope).
    pub fn set_default_scope(&mut self, range: ScopeRange) {
        self.default_range = range;
    }

    /// The range used when the caller does not specify one.
    pub fn default_scope(&self) -> ScopeRange {
        self.default_range
    }

    /// Acquires a scope of the default range around `vertex`.
    pub fn get_scope(&self, worker: WorkerId, vertex: VertexId) -> VertexScope<'_, V, E> {
        self.get_scope_with(worker, vertex, self.default_range)
    }

    /// Acquires a scope of an explicit range around `vertex`, blocking the
    /// calling worker until every lock in the plan is held.
    pub fn get_scope_with(
        &self,
        worker: WorkerId,
        vertex: VertexId,
        range: ScopeRange,
    ) -> VertexScope<'_, V, E> {
        let plan = self.lock_plan(vertex, range);
        tracing::trace!(worker, vertex = vertex.0, ?range, locks = plan.len(), "acquiring scope");
        for &(v, kind) in &plan {
            self.acquire(v, kind);
        }
        VertexScope::snapshot(self.graph, &self.tables, vertex, range, plan)
    }

    /// Releases the scope's locks in reverse acquisition order and
    /// forwards every request freed by each release. The caller is
    /// expected to have committed the scope first.
    pub fn release_scope(&self, scope: VertexScope<'_, V, E>) {
        let mut released: Vec<Granted<Arc<Waiter>>> = Vec::new();
        for &(v, kind) in scope.plan.iter().rev() {
            released.clear();
            match kind {
                LockKind::Write => self.locks[v.index()].write_unlock(&mut released),
                LockKind::Read => self.locks[v.index()].read_unlock(&mut released),
            };
            for granted in &released {
                granted.request.grant();
            }
        }
    }

    /// Hands the payload tables back once all scopes are released.
    pub fn into_payloads(self) -> (Vec<V>, Vec<E>) {
        self.tables.into_payloads()
    }

    /// The sorted `(vertex, kind)` acquisition plan for a range.
    fn lock_plan(&self, center: VertexId, range: ScopeRange) -> Vec<(VertexId, LockKind)> {
        let mut plan = match range {
            ScopeRange::None => Vec::new(),
            ScopeRange::VertexRead => vec![(center, LockKind::Read)],
            ScopeRange::VertexWrite => vec![(center, LockKind::Write)],
            ScopeRange::Edge | ScopeRange::Full => {
                let neighbor_kind = if range == ScopeRange::Full {
                    LockKind::Write
                } else {
                    LockKind::Read
                };
                let neighbors = self.graph.neighbor_ids(center).unwrap_or(&[]);
                let mut plan = Vec::with_capacity(neighbors.len() + 1);
                plan.push((center, LockKind::Write));
                plan.extend(neighbors.iter().map(|&n| (n, neighbor_kind)));
                plan
            }
        };
        plan.sort_by_key(|&(v, _)| v);
        plan
    }

    /// Acquires one lock, parking on the waiter if the request is queued.
    fn acquire(&self, vertex: VertexId, kind: LockKind) {
        let waiter = Waiter::new();
        match kind {
            LockKind::Write => {
                if self.locks[vertex.index()].write_lock(Arc::clone(&waiter)) {
                    return;
                }
            }
            LockKind::Read => {
                let mut released = Vec::new();
                self.locks[vertex.index()].read_lock(Arc::clone(&waiter), &mut released);
                for granted in &released {
                    granted.request.grant();
                }
            }
        }
        waiter.wait();
    }
}

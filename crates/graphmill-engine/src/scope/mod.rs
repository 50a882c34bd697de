//! Consistency scopes: the window of graph state an update function may
//! touch while it runs.
//!
//! A [`VertexScope`] is issued by the [`ScopeFactory`] for one worker
//! iteration. It snapshots the payloads its [`ScopeRange`] covers while the
//! corresponding per-vertex locks are held, gives the update function
//! read/write access checked against the range, and writes mutated
//! snapshots back on `commit()`. Because the locks stay held from
//! acquisition to release, the effects of two updates with overlapping
//! scopes are equivalent to some serial order.

mod factory;
mod vertex_scope;

pub use factory::ScopeFactory;
pub use graphmill_core::config::ScopeRange;
pub use vertex_scope::VertexScope;

use parking_lot::Mutex;

/// Shared payload cells guarded by the factory's per-vertex locks.
///
/// The cell mutexes only satisfy aliasing during snapshot and write-back;
/// exclusion between overlapping scopes comes from the deferred RW locks.
pub(crate) struct DataTables<V, E> {
    pub(crate) vertices: Vec<Mutex<V>>,
    pub(crate) edges: Vec<Mutex<E>>,
}

impl<V, E> DataTables<V, E> {
    pub(crate) fn new(vertices: Vec<V>, edges: Vec<E>) -> Self {
        DataTables {
            vertices: vertices.into_iter().map(Mutex::new).collect(),
            edges: edges.into_iter().map(Mutex::new).collect(),
        }
    }

    pub(crate) fn into_payloads(self) -> (Vec<V>, Vec<E>) {
        (
            self.vertices.into_iter().map(Mutex::into_inner).collect(),
            self.edges.into_iter().map(Mutex::into_inner).collect(),
        )
    }
}

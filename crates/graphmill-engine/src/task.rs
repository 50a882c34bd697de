//! Update tasks: the unit of scheduled work.
//!
//! An [`UpdateTask`] pairs a vertex with the update function to run on it.
//! Two tasks are equal iff both fields match; schedulers that deduplicate
//! rely on exactly this equality, keying on the function's code address.

use std::fmt;
use std::hash::{Hash, Hasher};

use graphmill_core::id::VertexId;
use graphmill_core::shared::SharedData;

use crate::scheduler::TaskPoster;
use crate::scope::VertexScope;

/// The vertex update function supplied by the user.
///
/// Receives the consistency scope around the task's vertex, a poster for
/// scheduling follow-up tasks, and the shared application context. Update
/// functions are synchronous and must not block on external I/O.
pub type UpdateFn<V, E> =
    fn(&mut VertexScope<'_, V, E>, &TaskPoster<'_, V, E>, &SharedData);

/// An update task: a vertex paired with an update function.
pub struct UpdateTask<V, E> {
    vertex: VertexId,
    func: UpdateFn<V, E>,
}

impl<V, E> UpdateTask<V, E> {
    /// Creates a task for `vertex` running `func`.
    pub fn new(vertex: VertexId, func: UpdateFn<V, E>) -> Self {
        UpdateTask { vertex, func }
    }

    /// The vertex this task updates.
    pub fn vertex(&self) -> VertexId {
        self.vertex
    }

    /// The update function to invoke.
    pub fn function(&self) -> UpdateFn<V, E> {
        self.func
    }

    /// Code address of the update function; the dedup key.
    pub fn fn_addr(&self) -> usize {
        self.func as usize
    }
}

impl<V, E> Clone for UpdateTask<V, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V, E> Copy for UpdateTask<V, E> {}

impl<V, E> PartialEq for UpdateTask<V, E> {
    fn eq(&self, other: &Self) -> bool {
        self.vertex == other.vertex && self.fn_addr() == other.fn_addr()
    }
}

impl<V, E> Eq for UpdateTask<V, E> {}

impl<V, E> Hash for UpdateTask<V, E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vertex.hash(state);
        self.fn_addr().hash(state);
    }
}

impl<V, E> fmt::Debug for UpdateTask<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateTask")
            .field("vertex", &self.vertex)
            .field("func", &(self.fn_addr() as *const ()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn incr(scope: &mut VertexScope<'_, u64, ()>, _: &TaskPoster<'_, u64, ()>, _: &SharedData) {
        let _ = scope.center();
    }

    fn decr(scope: &mut VertexScope<'_, u64, ()>, _: &TaskPoster<'_, u64, ()>, _: &SharedData) {
        let _ = scope.range();
    }

    fn hash_of(task: &UpdateTask<u64, ()>) -> u64 {
        let mut h = DefaultHasher::new();
        task.hash(&mut h);
        h.finish()
    }

    #[test]
    fn equality_requires_both_fields() {
        let a = UpdateTask::new(VertexId(1), incr as UpdateFn<u64, ()>);
        let b = UpdateTask::new(VertexId(1), incr as UpdateFn<u64, ()>);
        let c = UpdateTask::new(VertexId(2), incr as UpdateFn<u64, ()>);
        let d = UpdateTask::new(VertexId(1), decr as UpdateFn<u64, ()>);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(hash_of(&a), hash_of(&b));
    }
}

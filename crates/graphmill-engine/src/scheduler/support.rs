//! Shared scheduler internals: the per-vertex task set and the sampling
//! multinomial.

use parking_lot::Mutex;

use graphmill_core::id::VertexId;

use crate::task::{UpdateFn, UpdateTask};

/// Outcome of adding a task to a [`VertexTaskSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// First pending instance of this `(vertex, fn)` pair.
    Added,
    /// Already pending; priority raised to the new maximum.
    Promoted,
    /// Already pending at an equal or higher priority.
    Unchanged,
}

struct Entry<V, E> {
    func: UpdateFn<V, E>,
    priority: f64,
}

/// Per-vertex pending tasks with their priorities.
///
/// Guarantees the deduplication invariant: at any instant the set holds at
/// most one instance of each `(vertex, fn)` pair, and re-adding keeps the
/// maximum priority. Each vertex slot has its own short mutex; operations
/// that must see a consistent slot (pop + next priority) take it once.
pub struct VertexTaskSet<V, E> {
    slots: Vec<Mutex<Vec<Entry<V, E>>>>,
}

impl<V, E> VertexTaskSet<V, E> {
    /// A set over `num_vertices` empty slots.
    pub fn new(num_vertices: usize) -> Self {
        VertexTaskSet {
            slots: (0..num_vertices).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    /// Adds a task, deduplicating by `(vertex, fn)` and keeping the
    /// maximum priority. Returns the outcome and the slot's top priority
    /// after the add.
    pub fn add(&self, task: UpdateTask<V, E>, priority: f64) -> (AddOutcome, f64) {
        let mut slot = self.slots[task.vertex().index()].lock();
        let outcome = match slot.iter_mut().find(|e| e.func as usize == task.fn_addr()) {
            Some(entry) => {
                if priority > entry.priority {
                    entry.priority = priority;
                    AddOutcome::Promoted
                } else {
                    AddOutcome::Unchanged
                }
            }
            None => {
                slot.push(Entry {
                    func: task.function(),
                    priority,
                });
                AddOutcome::Added
            }
        };
        let top = slot.iter().map(|e| e.priority).fold(f64::MIN, f64::max);
        (outcome, top)
    }

    /// Removes a specific `(vertex, fn)` instance. Returns whether it was
    /// pending.
    pub fn remove(&self, vertex: VertexId, func: UpdateFn<V, E>) -> bool {
        let mut slot = self.slots[vertex.index()].lock();
        let before = slot.len();
        slot.retain(|e| e.func as usize != func as usize);
        slot.len() != before
    }

    /// Pops the highest-priority task pending on `vertex`. Returns the
    /// task, its priority, and the top priority remaining in the slot
    /// (0 when the slot is now empty), all under one slot lock.
    pub fn pop_top(&self, vertex: VertexId) -> Option<(UpdateTask<V, E>, f64, f64)> {
        let mut slot = self.slots[vertex.index()].lock();
        let best = slot
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.priority.total_cmp(&b.1.priority))?
            .0;
        let entry = slot.swap_remove(best);
        let remaining = slot.iter().map(|e| e.priority).fold(0.0, f64::max);
        Some((
            UpdateTask::new(vertex, entry.func),
            entry.priority,
            remaining,
        ))
    }

    /// The highest priority pending on `vertex`, if any.
    pub fn top_priority(&self, vertex: VertexId) -> Option<f64> {
        let slot = self.slots[vertex.index()].lock();
        slot.iter().map(|e| e.priority).max_by(f64::total_cmp)
    }
}

/// Fixed-capacity multinomial sampler over non-negative weights.
///
/// A binary sum tree: leaves hold per-vertex weights, internal nodes hold
/// subtree sums, sampling descends from the root in O(log n). The whole
/// tree sits behind one mutex; updates and samples are short.
pub struct FastMultinomial {
    tree: Mutex<Vec<f64>>,
    leaves: usize,
    capacity: usize,
}

impl FastMultinomial {
    /// A sampler over `capacity` slots, all initially weight zero.
    pub fn new(capacity: usize) -> Self {
        let leaves = capacity.next_power_of_two().max(1);
        FastMultinomial {
            tree: Mutex::new(vec![0.0; 2 * leaves]),
            leaves,
            capacity,
        }
    }

    /// Sets the weight of slot `i`. Negative weights clamp to zero.
    pub fn set(&self, i: usize, weight: f64) {
        debug_assert!(i < self.capacity);
        let mut tree = self.tree.lock();
        let mut node = self.leaves + i;
        tree[node] = weight.max(0.0);
        while node > 1 {
            node /= 2;
            tree[node] = tree[2 * node] + tree[2 * node + 1];
        }
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.tree.lock()[1]
    }

    /// Draws a slot with probability proportional to its weight, given a
    /// uniform draw `r` in `[0, 1)`. Returns `None` when all weights are
    /// zero.
    pub fn sample(&self, r: f64) -> Option<usize> {
        let tree = self.tree.lock();
        let total = tree[1];
        if total <= 0.0 {
            return None;
        }
        let mut x = r.clamp(0.0, 1.0) * total;
        let mut node = 1;
        while node < self.leaves {
            let left = tree[2 * node];
            if x < left {
                node = 2 * node;
            } else {
                x -= left;
                node = 2 * node + 1;
            }
        }
        let slot = node - self.leaves;
        // Float rounding can land on an empty leaf at the boundary.
        if slot < self.capacity && tree[node] > 0.0 {
            Some(slot)
        } else {
            tree.iter()
                .skip(self.leaves)
                .take(self.capacity)
                .position(|&w| w > 0.0)
        }
    }
}

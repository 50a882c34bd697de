//! Shared data context threaded through update invocations.
//!
//! [`SharedData`] is a typed registry of application state, assembled
//! before the engine starts and passed by reference to every update
//! function and termination predicate. It replaces process-wide singletons
//! with an explicit context object: insertion happens during setup, reads
//! are lock-free afterwards.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// A termination predicate evaluated periodically by the engine.
pub type TerminationFn = fn(&SharedData) -> bool;

/// Immutable-after-setup typed registry of shared application state.
///
/// Entries are keyed by type; interior mutability (atomics, locks) inside
/// the stored values is the intended way to share mutable state between
/// update functions.
#[derive(Default)]
pub struct SharedData {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl SharedData {
    /// Creates an empty context.
    pub fn new() -> Self {
        SharedData {
            entries: HashMap::new(),
        }
    }

    /// Stores a value, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a value by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    /// Whether a value of type `T` is present.
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counters(Vec<AtomicU64>);

    #[test]
    fn insert_and_get_by_type() {
        let mut data = SharedData::new();
        data.insert(Counters(vec![AtomicU64::new(0), AtomicU64::new(0)]));
        data.insert(3.5f64);

        let counters = data.get::<Counters>().unwrap();
        counters.0[1].fetch_add(2, Ordering::Relaxed);
        assert_eq!(counters.0[1].load(Ordering::Relaxed), 2);
        assert_eq!(*data.get::<f64>().unwrap(), 3.5);
        assert!(data.get::<u32>().is_none());
    }

    #[test]
    fn insert_replaces_same_type() {
        let mut data = SharedData::new();
        data.insert(1u64);
        data.insert(2u64);
        assert_eq!(*data.get::<u64>().unwrap(), 2);
    }
}

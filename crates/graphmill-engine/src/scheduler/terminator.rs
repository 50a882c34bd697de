//! Termination assessment for schedulers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Scheduler-owned predicate polled by the engine to decide whether the
/// run is over.
pub trait Terminator: Send + Sync {
    /// True when no outstanding tasks exist and no worker is executing.
    fn finished(&self) -> bool;
}

/// Terminator that counts jobs in and jobs out.
///
/// A task counts as outstanding from the moment it is first added until
/// `completed_task` acknowledges it, so tasks currently executing keep the
/// terminator unfinished.
#[derive(Default)]
pub struct TaskCountTerminator {
    added: AtomicU64,
    completed: AtomicU64,
}

impl TaskCountTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly added job.
    pub fn new_job(&self) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a completed job.
    pub fn completed_job(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Jobs added but not yet completed.
    pub fn outstanding(&self) -> u64 {
        self.added
            .load(Ordering::SeqCst)
            .saturating_sub(self.completed.load(Ordering::SeqCst))
    }
}

impl Terminator for TaskCountTerminator {
    fn finished(&self) -> bool {
        // Read completions first: racing the other way could observe an
        // add without its completion and still report finished.
        let completed = self.completed.load(Ordering::SeqCst);
        let added = self.added.load(Ordering::SeqCst);
        added == completed
    }
}

/// Terminator driven by an explicit completion signal, used by schedulers
/// with implicit task sets (colored, round-robin).
#[derive(Default)]
pub struct ControlledTerminator {
    done: AtomicBool,
}

impl ControlledTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the schedule complete. Idempotent.
    pub fn complete(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Clears the completion flag for a restart.
    pub fn reset(&self) {
        self.done.store(false, Ordering::SeqCst);
    }
}

impl Terminator for ControlledTerminator {
    fn finished(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_count_tracks_outstanding_jobs() {
        let t = TaskCountTerminator::new();
        assert!(t.finished());

        t.new_job();
        t.new_job();
        assert!(!t.finished());
        assert_eq!(t.outstanding(), 2);

        t.completed_job();
        assert!(!t.finished());
        t.completed_job();
        assert!(t.finished());
    }

    #[test]
    fn controlled_completes_once_signalled() {
        let t = ControlledTerminator::new();
        assert!(!t.finished());
        t.complete();
        t.complete();
        assert!(t.finished());
        t.reset();
        assert!(!t.finished());
    }
}

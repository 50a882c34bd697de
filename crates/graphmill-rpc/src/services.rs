//! Cluster-wide services built over control calls.
//!
//! The counting barrier behind `full_barrier`: every process announces
//! arrival to rank 0 together with its totals of user calls sent and
//! processed; rank 0 releases the round once all ranks have arrived,
//! reporting whether the cluster is quiescent (every call sent anywhere
//! has been processed). `full_barrier` repeats rounds until quiescent, so
//! the deferred-dispatch queues of all peers are drained before it
//! returns. Epochs are derived from how many barriers each process has
//! entered, so all processes must reach barriers in the same order, the
//! same discipline the distributed-object registry requires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Arrivals {
    count: usize,
    sent_sum: u64,
    processed_sum: u64,
}

struct BarrierInner {
    /// Arrivals per epoch, tracked on the coordinator.
    entered: HashMap<u64, Arrivals>,
    /// Coordinator verdict per released epoch.
    released: HashMap<u64, bool>,
}

/// State of the counting barrier on one process.
pub struct BarrierService {
    epoch: AtomicU64,
    inner: Mutex<BarrierInner>,
    cond: Condvar,
}

impl Default for BarrierService {
    fn default() -> Self {
        Self::new()
    }
}

impl BarrierService {
    pub fn new() -> Self {
        BarrierService {
            epoch: AtomicU64::new(0),
            inner: Mutex::new(BarrierInner {
                entered: HashMap::new(),
                released: HashMap::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Allocates this process's next barrier epoch.
    pub fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Coordinator: records one arrival for `epoch` with the arriving
    /// process's call totals.
    pub fn note_entered(&self, epoch: u64, sent: u64, processed: u64) {
        let mut inner = self.inner.lock();
        let arrivals = inner.entered.entry(epoch).or_default();
        arrivals.count += 1;
        arrivals.sent_sum += sent;
        arrivals.processed_sum += processed;
        self.cond.notify_all();
    }

    /// Coordinator: blocks until `count` arrivals for `epoch`, returning
    /// the cluster-wide `(sent, processed)` sums.
    pub fn wait_entered(&self, epoch: u64, count: usize) -> (u64, u64) {
        let mut inner = self.inner.lock();
        while inner.entered.get(&epoch).map(|a| a.count).unwrap_or(0) < count {
            self.cond.wait(&mut inner);
        }
        let arrivals = inner.entered.remove(&epoch).unwrap_or_default();
        (arrivals.sent_sum, arrivals.processed_sum)
    }

    /// Participant: records the coordinator's verdict for `epoch`.
    pub fn note_released(&self, epoch: u64, quiescent: bool) {
        let mut inner = self.inner.lock();
        inner.released.insert(epoch, quiescent);
        self.cond.notify_all();
    }

    /// Participant: blocks until the coordinator releases `epoch`,
    /// returning whether the cluster was quiescent.
    pub fn wait_released(&self, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if let Some(quiescent) = inner.released.remove(&epoch) {
                return quiescent;
            }
            self.cond.wait(&mut inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn coordinator_sums_arrivals() {
        let service = Arc::new(BarrierService::new());
        let epoch = service.next_epoch();

        let waiter = {
            let service = Arc::clone(&service);
            thread::spawn(move || service.wait_entered(epoch, 3))
        };
        service.note_entered(epoch, 10, 10);
        service.note_entered(epoch, 5, 3);
        service.note_entered(epoch, 0, 2);
        assert_eq!(waiter.join().unwrap(), (15, 15));
    }

    #[test]
    fn release_carries_the_verdict() {
        let service = Arc::new(BarrierService::new());
        let epoch = service.next_epoch();

        let waiter = {
            let service = Arc::clone(&service);
            thread::spawn(move || service.wait_released(epoch))
        };
        service.note_released(epoch, false);
        assert!(!waiter.join().unwrap());
    }
}

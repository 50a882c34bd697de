//! A blocking MPMC queue for producer/consumer hand-off.
//!
//! Backs the RPC deferred-dispatch pool: receive threads enqueue raw call
//! blocks, handler threads block on [`BlockingQueue::dequeue`]. Shutdown is
//! cooperative: [`BlockingQueue::stop_blocking`] wakes every waiter and
//! permanently disables the queue.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    alive: bool,
}

/// Blocking multi-producer multi-consumer FIFO queue.
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    /// Signalled when an item arrives or the queue is stopped.
    nonempty: Condvar,
    /// Signalled when the queue drains or is stopped.
    empty: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Creates an empty, live queue.
    pub fn new() -> Self {
        BlockingQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                alive: true,
            }),
            nonempty: Condvar::new(),
            empty: Condvar::new(),
        }
    }

    /// Appends an element and wakes one waiting consumer.
    pub fn enqueue(&self, item: T) {
        let mut inner = self.inner.lock();
        inner.items.push_back(item);
        self.nonempty.notify_one();
    }

    /// Blocks until an element is available or the queue is stopped.
    ///
    /// Returns `None` only once the queue has been stopped and drained.
    pub fn dequeue(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && inner.alive {
            self.nonempty.wait(&mut inner);
        }
        let item = inner.items.pop_front();
        if inner.items.is_empty() {
            self.empty.notify_all();
        }
        item
    }

    /// Pops an element without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front();
        if item.is_some() && inner.items.is_empty() {
            self.empty.notify_all();
        }
        item
    }

    /// Blocks until the queue becomes empty or is stopped.
    ///
    /// Returns `true` if the queue is empty and still alive, `false` if it
    /// was stopped while waiting.
    pub fn wait_until_empty(&self) -> bool {
        let mut inner = self.inner.lock();
        while !inner.items.is_empty() && inner.alive {
            self.empty.wait(&mut inner);
        }
        inner.alive
    }

    /// Wakes all waiters and permanently disables the queue.
    ///
    /// Elements already enqueued can still be drained with `dequeue` or
    /// `try_dequeue`; no new blocking occurs after this call.
    pub fn stop_blocking(&self) {
        let mut inner = self.inner.lock();
        inner.alive = false;
        self.nonempty.notify_all();
        self.empty.notify_all();
    }

    /// Current number of queued elements.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

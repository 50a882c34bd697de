//! A deferred reader/writer lock with queued requests.
//!
//! Unlike a conventional RW lock, acquisition never parks the calling
//! thread: a request that cannot be granted immediately is queued, and
//! every unlock returns the chain of requests it freed. The caller decides
//! what "waking" means (the scope factory forwards grants to per-request
//! events), so many in-flight acquisitions can be driven without a
//! proportional thread count.
//!
//! Grant order is FIFO-fair for writers: once a write request is queued,
//! later-arriving readers queue behind it rather than overtaking, so a
//! writer is never starved by a stream of readers. Readers are granted in
//! contiguous runs: releasing the last holder grants either the head
//! writer or the entire reader prefix of the queue at once.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Direction of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

/// A request granted by an unlock, handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granted<T> {
    pub request: T,
    pub kind: LockKind,
}

struct State<T> {
    queue: VecDeque<(T, LockKind)>,
    reader_count: u32,
    writer: bool,
}

impl<T> State<T> {
    /// Grants the contiguous run of read requests at the head of the
    /// queue. The head must be a read request.
    fn complete_readers(&mut self, released: &mut Vec<Granted<T>>) -> usize {
        let mut granted = 0;
        while matches!(self.queue.front(), Some((_, LockKind::Read))) {
            if let Some((request, kind)) = self.queue.pop_front() {
                released.push(Granted { request, kind });
                granted += 1;
            }
        }
        self.reader_count += granted as u32;
        granted
    }

    /// Grants a single write request at the head of the queue.
    fn complete_writer(&mut self, released: &mut Vec<Granted<T>>) -> usize {
        match self.queue.pop_front() {
            Some((request, kind)) => {
                self.writer = true;
                released.push(Granted { request, kind });
                1
            }
            None => 0,
        }
    }

    /// Grants whatever the head of the queue permits after a full release.
    fn grant_head(&mut self, released: &mut Vec<Granted<T>>) -> usize {
        let head_kind = self.queue.front().map(|(_, kind)| *kind);
        match head_kind {
            Some(LockKind::Read) => self.complete_readers(released),
            Some(LockKind::Write) => self.complete_writer(released),
            None => 0,
        }
    }
}

/// FIFO-fair reader/writer lock with a queue of deferred requests.
pub struct DeferredRwLock<T> {
    state: Mutex<State<T>>,
}

impl<T> Default for DeferredRwLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeferredRwLock<T> {
    /// Creates an unheld lock with an empty queue.
    pub fn new() -> Self {
        DeferredRwLock {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                reader_count: 0,
                writer: false,
            }),
        }
    }

    /// Requests the lock for writing.
    ///
    /// Returns `true` if the lock was granted immediately; otherwise the
    /// request is queued and will come back through a future unlock's
    /// released list.
    pub fn write_lock(&self, request: T) -> bool {
        let mut state = self.state.lock();
        if state.reader_count == 0 && !state.writer && state.queue.is_empty() {
            state.writer = true;
            true
        } else {
            state.queue.push_back((request, LockKind::Write));
            false
        }
    }

    /// Requests the lock for reading.
    ///
    /// Appends every request granted by this call (possibly including
    /// `request` itself, on the fast path) to `released` and returns the
    /// number granted. A non-empty queue disables the fast path so that a
    /// queued writer is never overtaken.
    pub fn read_lock(&self, request: T, released: &mut Vec<Granted<T>>) -> usize {
        let mut state = self.state.lock();
        if state.queue.is_empty() && !state.writer {
            state.reader_count += 1;
            released.push(Granted {
                request,
                kind: LockKind::Read,
            });
            return 1;
        }
        state.queue.push_back((request, LockKind::Read));
        if !state.writer && matches!(state.queue.front(), Some((_, LockKind::Read))) {
            state.complete_readers(released)
        } else {
            0
        }
    }

    /// Releases a write hold and grants whatever the queue head permits.
    ///
    /// Returns the number of newly granted requests, appended to
    /// `released`: either one writer or a contiguous run of readers.
    pub fn write_unlock(&self, released: &mut Vec<Granted<T>>) -> usize {
        let mut state = self.state.lock();
        debug_assert!(state.writer);
        state.writer = false;
        state.grant_head(released)
    }

    /// Releases a read hold; the last reader out grants the queue head.
    pub fn read_unlock(&self, released: &mut Vec<Granted<T>>) -> usize {
        let mut state = self.state.lock();
        debug_assert!(state.reader_count > 0);
        state.reader_count -= 1;
        if state.reader_count == 0 {
            state.grant_head(released)
        } else {
            0
        }
    }

    /// Number of read holds. Debugging accessor.
    pub fn reader_count(&self) -> u32 {
        self.state.lock().reader_count
    }

    /// Whether a writer currently holds the lock. Debugging accessor.
    pub fn writer_held(&self) -> bool {
        self.state.lock().writer
    }

    /// Whether any request is queued. Debugging accessor.
    pub fn has_waiters(&self) -> bool {
        !self.state.lock().queue.is_empty()
    }
}

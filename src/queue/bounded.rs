//! Bounded FIFO with abort and epoch-tagged flush.
//!
//! Multi-producer / single-consumer. Blocking push and pop are both
//! interruptible by `abort`, which wakes every waiter permanently. A flush
//! discards queued entries and raises the queue epoch; pushes tagged with an
//! older epoch are rejected, which fences in-flight work dropped by a seek.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Outcome of a (possibly blocking) push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The entry's epoch predates the last flush; it was discarded.
    Stale,
    Aborted,
}

/// Outcome of a pop with timeout.
#[derive(Debug)]
pub enum PopResult<T> {
    Item(T, u64),
    TimedOut,
    Aborted,
}

struct Inner<T> {
    items: VecDeque<(T, u64)>,
    epoch: u64,
    aborted: bool,
}

pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be nonzero");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                epoch: 0,
                aborted: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Push an entry, blocking while the queue is full.
    pub fn push(&self, item: T, epoch: u64) -> PushOutcome {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.aborted {
                return PushOutcome::Aborted;
            }
            if epoch < inner.epoch {
                return PushOutcome::Stale;
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back((item, epoch));
                self.not_empty.notify_one();
                return PushOutcome::Pushed;
            }
            inner = self.not_full.wait(inner).unwrap();
        }
    }

    /// Pop the oldest entry, blocking while empty. `None` means aborted.
    pub fn pop(&self) -> Option<(T, u64)> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.aborted {
                return None;
            }
            if let Some(entry) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Some(entry);
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Pop with a timeout so callers can interleave EOF checks.
    pub fn pop_timeout(&self, timeout: Duration) -> PopResult<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.aborted {
                return PopResult::Aborted;
            }
            if let Some((item, epoch)) = inner.items.pop_front() {
                self.not_full.notify_one();
                return PopResult::Item(item, epoch);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return PopResult::TimedOut;
            }
            let (guard, res) = self.not_empty.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
            if res.timed_out() && inner.items.is_empty() {
                if inner.aborted {
                    return PopResult::Aborted;
                }
                return PopResult::TimedOut;
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<(T, u64)> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.items.pop_front();
        if entry.is_some() {
            self.not_full.notify_one();
        }
        entry
    }

    /// Discard everything and raise the queue epoch. Waiting pushers wake
    /// and re-evaluate; pushes tagged below the new epoch are rejected.
    pub fn flush(&self, epoch: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.clear();
        if epoch > inner.epoch {
            inner.epoch = epoch;
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Permanently wake all waiters; subsequent push/pop return immediately.
    pub fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.aborted = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().unwrap().epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_fifo() {
        let q = BoundedQueue::new(4);
        assert_eq!(q.push(1, 0), PushOutcome::Pushed);
        assert_eq!(q.push(2, 0), PushOutcome::Pushed);
        assert_eq!(q.pop(), Some((1, 0)));
        assert_eq!(q.pop(), Some((2, 0)));
    }

    #[test]
    fn test_flush_rejects_stale_epochs() {
        let q = BoundedQueue::new(4);
        q.push("old", 0);
        q.flush(1);
        assert!(q.is_empty());
        assert_eq!(q.push("stale", 0), PushOutcome::Stale);
        assert_eq!(q.push("fresh", 1), PushOutcome::Pushed);
        assert_eq!(q.pop(), Some(("fresh", 1)));
    }

    #[test]
    fn test_abort_wakes_blocked_consumer() {
        let q = Arc::new(BoundedQueue::<u32>::new(2));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        q.abort();
        assert_eq!(handle.join().unwrap(), None);
        assert_eq!(q.push(7, 0), PushOutcome::Aborted);
    }

    #[test]
    fn test_abort_wakes_blocked_producer() {
        let q = Arc::new(BoundedQueue::new(1));
        q.push(1, 0);
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.push(2, 0));
        thread::sleep(Duration::from_millis(20));
        q.abort();
        assert_eq!(handle.join().unwrap(), PushOutcome::Aborted);
    }

    #[test]
    fn test_blocked_producer_resumes_after_pop() {
        let q = Arc::new(BoundedQueue::new(1));
        q.push(1, 0);
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.push(2, 0));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.pop(), Some((1, 0)));
        assert_eq!(handle.join().unwrap(), PushOutcome::Pushed);
        assert_eq!(q.pop(), Some((2, 0)));
    }

    #[test]
    fn test_pop_timeout_expires() {
        let q = BoundedQueue::<u32>::new(2);
        match q.pop_timeout(Duration::from_millis(10)) {
            PopResult::TimedOut => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_flush_epoch_never_regresses() {
        let q = BoundedQueue::<u32>::new(2);
        q.flush(5);
        q.flush(3);
        assert_eq!(q.epoch(), 5);
    }
}

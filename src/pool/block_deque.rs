use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    deq: VecDeque<T>,
    closed: bool,
}

/// Closable bounded blocking deque.
///
/// Producers block while the deque is full, consumers while it is empty;
/// both return promptly once `close` has run. The async log writer drains
/// one of these, but it is a general-purpose primitive.
pub struct BlockDeque<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    cond_consumer: Condvar,
    cond_producer: Condvar,
}

impl<T> BlockDeque<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        BlockDeque {
            capacity,
            inner: Mutex::new(Inner {
                deq: VecDeque::new(),
                closed: false,
            }),
            cond_consumer: Condvar::new(),
            cond_producer: Condvar::new(),
        }
    }

    /// Blocks while full. Returns false once the deque is closed.
    pub fn push_back(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        while inner.deq.len() >= self.capacity && !inner.closed {
            inner = self.cond_producer.wait(inner).unwrap();
        }
        if inner.closed {
            return false;
        }
        inner.deq.push_back(item);
        drop(inner);
        self.cond_consumer.notify_one();
        true
    }

    /// Blocks while empty. Returns None once the deque is closed.
    pub fn pop_front(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.deq.pop_front() {
                self.cond_producer.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.cond_consumer.wait(inner).unwrap();
        }
    }

    /// Like `pop_front`, but gives up after `timeout` and returns None.
    pub fn pop_front_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.deq.pop_front() {
                self.cond_producer.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            let (guard, result) = self.cond_consumer.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            if result.timed_out() {
                return inner.deq.pop_front();
            }
        }
    }

    /// Drains the deque, sets the closed flag and wakes every waiter.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.deq.clear();
            inner.closed = true;
        }
        self.cond_consumer.notify_all();
        self.cond_producer.notify_all();
    }

    /// Wakes one consumer without enqueuing anything.
    pub fn flush(&self) {
        self.cond_consumer.notify_one();
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().deq.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().deq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().deq.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().unwrap().deq.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

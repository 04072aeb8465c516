//! Bounded blocking FIFO feeding a state machine.
//!
//! `new(size)` reserves one slot, so at most `size - 1` events are held.
//! `push` never blocks; it fails at the boundary.  `pull` blocks until an
//! event arrives or the queue is reset.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct Inner<E> {
    events: VecDeque<E>,
    closed: bool,
}

pub struct EventQueue<E> {
    inner: Mutex<Inner<E>>,
    available: Condvar,
    capacity: usize,
}

impl<E> EventQueue<E> {
    pub fn new(size: usize) -> Self {
        let capacity = size.saturating_sub(1);
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Append `event`.  Returns `false` when full or closed.
    pub fn push(&self, event: E) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed || inner.events.len() >= self.capacity {
            return false;
        }
        inner.events.push_back(event);
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Block until an event is available.  `None` once the queue is reset.
    pub fn pull(&self) -> Option<E> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(event) = inner.events.pop_front() {
                return Some(event);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Drop all queued events, close the queue and wake every puller.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.events.clear();
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    /// Accept pushes again after a `reset`.
    pub fn open(&self) {
        self.inner.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events the queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

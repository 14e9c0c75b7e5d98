// src/queue.rs
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{MinnowError, MinnowResult};

struct Ring<T> {
    buf: Box<[Option<T>]>,
    front: usize,
    size: usize,
}

impl<T> Ring<T> {
    fn push(&mut self, item: T) {
        let back = (self.front + self.size) % self.buf.len();
        self.buf[back] = Some(item);
        self.size += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let item = self.buf[self.front].take();
        self.front = (self.front + 1) % self.buf.len();
        self.size -= 1;
        item
    }
}

/// Bounded blocking queue over a fixed-capacity circular buffer.
///
/// Producers never block: `push` fails at capacity (after waking waiters so
/// blocked consumers re-check). Consumers block in `pop`, optionally with a
/// timeout. Shared by the worker pool's task queue and the async log writer.
pub struct BlockQueue<T> {
    ring: Mutex<Ring<T>>,
    cond: Condvar,
    capacity: usize,
}

impl<T> BlockQueue<T> {
    pub fn new(capacity: usize) -> MinnowResult<Self> {
        if capacity == 0 {
            return Err(MinnowError::Config(
                "block queue capacity must be positive".into(),
            ));
        }
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Ok(Self {
            ring: Mutex::new(Ring {
                buf: buf.into_boxed_slice(),
                front: 0,
                size: 0,
            }),
            cond: Condvar::new(),
            capacity,
        })
    }

    /// Enqueue an item. Returns false when the queue is at capacity; waiters
    /// are woken either way so a blocked consumer can re-check.
    pub fn push(&self, item: T) -> bool {
        let mut ring = self.ring.lock().unwrap();
        if ring.size >= self.capacity {
            self.cond.notify_all();
            return false;
        }
        ring.push(item);
        self.cond.notify_all();
        true
    }

    /// Dequeue the front item, blocking until one is available.
    pub fn pop(&self) -> T {
        let mut ring = self.ring.lock().unwrap();
        while ring.size == 0 {
            ring = self.cond.wait(ring).unwrap();
        }
        ring.pop().expect("non-empty ring")
    }

    /// Dequeue with a bounded wait. Returns None on expiry or when a wakeup
    /// found the queue already drained by another consumer.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.ring.lock().unwrap();
        while ring.size == 0 {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self.cond.wait_timeout(ring, deadline - now).unwrap();
            ring = guard;
            if result.timed_out() && ring.size == 0 {
                return None;
            }
        }
        ring.pop()
    }

    pub fn is_full(&self) -> bool {
        self.ring.lock().unwrap().size >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().unwrap().size == 0
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut ring = self.ring.lock().unwrap();
        while ring.pop().is_some() {}
        ring.front = 0;
    }
}

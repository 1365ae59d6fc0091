//! The bounded channel between grabbers and the writer thread
//!
//! Both producers share one FIFO; the writer thread is the sole consumer.
//! A full queue blocks the producing grabber (backpressure instead of
//! dropping), an empty queue blocks the writer. Closing the queue is the
//! shutdown signal: the writer drains whatever is left and then sees `None`.

use crate::media::Sample;
use parking_lot::{Condvar, Mutex as ParkingMutex};
use std::collections::VecDeque;

struct Inner {
    samples: VecDeque<Sample>,
    closed: bool,
}

/// A bounded, strictly-ordered, thread-safe sample queue.
pub struct WriterQueue {
    inner: ParkingMutex<Inner>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl WriterQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        WriterQueue {
            inner: ParkingMutex::new(Inner {
                samples: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().samples.is_empty()
    }

    /// Enqueues a sample, blocking while the queue is full. Returns the
    /// sample back when the queue has been closed in the meantime.
    pub fn push(&self, sample: Sample) -> Result<(), Sample> {
        let mut inner = self.inner.lock();
        while inner.samples.len() >= self.capacity && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return Err(sample);
        }
        inner.samples.push_back(sample);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the next sample in FIFO order, blocking while the queue is
    /// empty and open. Returns `None` exactly when the queue is closed AND
    /// empty, so already-enqueued samples always drain before shutdown.
    pub fn pop(&self) -> Option<Sample> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(sample) = inner.samples.pop_front() {
                self.not_full.notify_one();
                return Some(sample);
            }
            if inner.closed {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Closes the queue. Blocked producers give up, and the consumer exits
    /// once the backlog is drained.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

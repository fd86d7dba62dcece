//! Reusable header accumulation buffers.
//!
//! # Design Decisions
//! - Buffers return to the pool on drop, so a session closed mid-read leaks nothing
//! - Buffers that grew past the configured header limit are discarded, not pooled

use bytes::BytesMut;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Pool of `BytesMut` buffers shared by all sessions.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    initial_capacity: usize,
    max_capacity: usize,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(initial_capacity: usize, max_capacity: usize, max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            initial_capacity,
            max_capacity,
            max_pooled,
        })
    }

    /// Take a cleared buffer from the pool, allocating if it is empty.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_else(|| BytesMut::with_capacity(self.initial_capacity));

        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_capacity {
            return;
        }
        buf.clear();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.max_pooled {
                free.push(buf);
            }
        }
    }
}

/// A buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

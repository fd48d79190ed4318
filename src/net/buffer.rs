//! Reusable I/O buffers for tunnel relays.
//!
//! # Responsibilities
//! - Hand out fixed-capacity `BytesMut` buffers
//! - Take them back on drop for the next relay
//!
//! # Design Decisions
//! - Bounded free-list; surplus buffers are simply freed
//! - Buffers are cleared before reuse, capacity is kept

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;

/// Size of one relay buffer.
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Idle buffers kept by default.
pub const DEFAULT_MAX_IDLE_BUFFERS: usize = 1024;

#[derive(Debug)]
struct BufferPoolInner {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_idle: usize,
}

/// Shared pool of relay buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                free: Mutex::new(Vec::new()),
                buffer_size,
                max_idle,
            }),
        }
    }

    fn free(&self) -> MutexGuard<'_, Vec<BytesMut>> {
        self.inner.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self) -> PooledBuffer {
        let buffer = self
            .free()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_size));
        PooledBuffer {
            buffer: Some(buffer),
            pool: self.clone(),
        }
    }

    fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        if buffer.capacity() < self.inner.buffer_size {
            return;
        }
        let mut free = self.free();
        if free.len() < self.inner.max_idle {
            free.push(buffer);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.free().len()
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(RELAY_BUFFER_SIZE, DEFAULT_MAX_IDLE_BUFFERS)
    }
}

/// A buffer on loan from a `BufferPool`.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Option<BytesMut>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("buffer used after release"),
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        match &mut self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("buffer used after release"),
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_recycled_cleared() {
        let pool = BufferPool::new(64, 4);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"payload");
        }
        assert_eq!(pool.idle_count(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool = BufferPool::new(16, 2);
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(held);
        assert_eq!(pool.idle_count(), 2);
    }
}

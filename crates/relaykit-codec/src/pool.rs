//! Reusable scratch buffers.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::NetworkWriter;

/// A pool of cleared [`NetworkWriter`]s shared between callers.
///
/// Buffers are handed out as [`PooledBuffer`] guards and come back to the
/// pool when the guard drops. Chunks read from a pooled buffer borrow the
/// guard, so they cannot be held past its return.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<NetworkWriter>>,
    max_pooled: usize,
    initial_capacity: usize,
}

impl BufferPool {
    /// Creates a pool that keeps at most `max_pooled` idle buffers, each
    /// allocated with `initial_capacity` bytes.
    pub fn new(max_pooled: usize, initial_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
            initial_capacity,
        })
    }

    /// Takes a cleared buffer from the pool, allocating if none is idle.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let writer = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| NetworkWriter::with_capacity(self.initial_capacity));
        PooledBuffer {
            writer: Some(writer),
            pool: Arc::clone(self),
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn release(&self, mut writer: NetworkWriter) {
        writer.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(writer);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled: 64,
            initial_capacity: 1024,
        }
    }
}

/// A buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    writer: Option<NetworkWriter>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = NetworkWriter;

    fn deref(&self) -> &NetworkWriter {
        self.writer.as_ref().expect("present until drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut NetworkWriter {
        self.writer.as_mut().expect("present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            self.pool.release(writer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_buffer_is_reused_and_cleared() {
        let pool = BufferPool::new(2, 16);
        {
            let mut buf = pool.acquire();
            buf.write_raw(&[1, 2, 3]);
        }
        assert_eq!(pool.idle(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 16);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_pool_caps_idle_buffers() {
        let pool = BufferPool::new(1, 8);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}

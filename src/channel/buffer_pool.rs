//! Recycled byte buffers for frame payloads.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Free-list of reusable frame buffers.
///
/// Buffers are cleared on return, so `get` always hands out an empty buffer
/// that may still hold capacity from an earlier frame. Concurrent callers
/// never observe the same buffer: a buffer is either in the free list or
/// owned by exactly one [`Payload`].
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Takes an empty buffer from the pool, allocating if none is free.
    pub(crate) fn get(&self) -> Vec<u8> {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Clears a buffer and returns it to the free list.
    pub(crate) fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.free.lock().push(buf);
    }

    #[cfg(test)]
    fn free_buffers(&self) -> usize {
        self.free.lock().len()
    }
}

/// A frame payload backed by a pooled buffer.
///
/// Cloning is cheap and shares the buffer; when the last clone drops, the
/// buffer goes back to its pool. Payloads built from plain vectors (parsers,
/// tests) are not pooled and are simply freed.
#[derive(Debug, Clone)]
pub struct Payload {
    inner: Arc<PooledBuffer>,
}

impl Payload {
    /// Wraps a buffer taken from `pool`, returning it there on final drop.
    pub(crate) fn pooled(data: Vec<u8>, pool: &Arc<BufferPool>) -> Self {
        Self {
            inner: Arc::new(PooledBuffer {
                data,
                pool: Arc::downgrade(pool),
            }),
        }
    }

    /// Wraps a buffer that does not belong to any pool.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(PooledBuffer {
                data,
                pool: Weak::new(),
            }),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

#[derive(Debug)]
struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<BufferPool>,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.put(std::mem::take(&mut self.data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_empty_buffer() {
        let pool = BufferPool::new();

        let mut buf = pool.get();
        buf.extend_from_slice(b"hello");
        pool.put(buf);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 5);
    }

    #[test]
    fn test_payload_recycles_on_last_drop() {
        let pool = BufferPool::new();

        let mut buf = pool.get();
        buf.extend_from_slice(b"frame");

        let payload = Payload::pooled(buf, &pool);
        let clone = payload.clone();
        assert_eq!(&*clone, b"frame");

        drop(payload);
        assert_eq!(pool.free_buffers(), 0);

        drop(clone);
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn test_detached_payload_has_no_pool() {
        let payload = Payload::from_vec(b"data".to_vec());
        assert_eq!(payload.as_bytes(), b"data");
        assert_eq!(payload.len(), 4);
        assert!(!payload.is_empty());
    }
}

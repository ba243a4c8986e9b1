//! Fixed-capacity frame buffer pool
//!
//! Buffers are preallocated at startup and handed out as move-only
//! [`PooledBuffer`]s. Dropping a buffer returns its storage to the pool, so
//! every frame is owned by exactly one holder at a time: the receive path,
//! a transmission queue, or the pool.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

struct PoolInner {
    free: Vec<BytesMut>,
    capacity: usize,
    frame_size: usize,
}

/// Shared handle to a buffer pool
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl BufferPool {
    /// Preallocate `capacity` buffers of `frame_size` bytes
    pub fn new(capacity: usize, frame_size: usize) -> Self {
        let free = (0..capacity)
            .map(|_| BytesMut::with_capacity(frame_size))
            .collect();
        BufferPool {
            inner: Arc::new(Mutex::new(PoolInner {
                free,
                capacity,
                frame_size,
            })),
        }
    }

    /// Take a buffer; `None` when the pool is exhausted
    pub fn get(&self) -> Option<PooledBuffer> {
        let mut inner = self.inner.lock();
        let mut data = inner.free.pop()?;
        data.clear();
        Some(PooledBuffer {
            data,
            frame_size: inner.frame_size,
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Take a buffer holding a copy of `frame`
    pub fn get_with(&self, frame: &[u8]) -> Option<PooledBuffer> {
        let mut buf = self.get()?;
        buf.fill(frame);
        Some(buf)
    }

    /// Return a buffer explicitly
    pub fn put(&self, buf: PooledBuffer) {
        drop(buf);
    }

    /// Buffers currently available
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Buffers currently held outside the pool
    pub fn outstanding(&self) -> usize {
        let inner = self.inner.lock();
        inner.capacity - inner.free.len()
    }

    /// Total buffers owned by the pool
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Size of each buffer
    pub fn frame_size(&self) -> usize {
        self.inner.lock().frame_size
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BufferPool")
            .field("available", &inner.free.len())
            .field("capacity", &inner.capacity)
            .field("frame_size", &inner.frame_size)
            .finish()
    }
}

/// Frame buffer on loan from a [`BufferPool`]
pub struct PooledBuffer {
    data: BytesMut,
    frame_size: usize,
    pool: Weak<Mutex<PoolInner>>,
}

impl PooledBuffer {
    /// Replace the contents with `frame`
    pub fn fill(&mut self, frame: &[u8]) {
        let data = &mut self.data;
        data.clear();
        data.extend_from_slice(frame);
    }

    /// Receive into the buffer
    ///
    /// The buffer is sized to the pool frame size, `f` writes into it and
    /// returns the number of bytes filled.
    pub fn fill_with<E>(
        &mut self,
        f: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let frame_size = self.frame_size;
        let data = &mut self.data;
        data.clear();
        data.resize(frame_size, 0);
        match f(&mut data[..]) {
            Ok(n) => {
                data.truncate(n.min(frame_size));
                Ok(n.min(frame_size))
            }
            Err(e) => {
                data.clear();
                Err(e)
            }
        }
    }

    /// Frame length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer").field("len", &self.len()).finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let mut data = std::mem::take(&mut self.data);
            data.clear();
            pool.lock().free.push(data);
        }
    }
}

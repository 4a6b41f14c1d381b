//! Buffer pool abstraction for the UDP relay path
//!
//! UDP ASSOCIATE allocates 64 KiB buffers at a high rate; the pool interface
//! lets deployments plug in a recycling allocator. The default implementation
//! allocates from the heap and drops on free.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Byte-buffer allocator used on the UDP datagram path.
///
/// Every buffer handed out by [`alloc`](BufferPool::alloc) is returned
/// through [`free`](BufferPool::free) on the owner's exit paths.
pub trait BufferPool: Send + Sync {
    /// Obtain a zeroed buffer of at least `size` bytes.
    fn alloc(&self, size: usize) -> Vec<u8>;

    /// Return a buffer to the pool.
    fn free(&self, buf: Vec<u8>);
}

/// Factory for per-handler buffer pools.
///
/// Each UDP ASSOCIATE handler creates its own pool instance so pooling
/// strategies can keep per-association state.
pub trait PoolProvider: Send + Sync {
    /// Create a pool for one UDP association.
    fn create(&self, cancel: &CancellationToken) -> Arc<dyn BufferPool>;
}

/// Default non-pooling allocator. `alloc` is a plain heap allocation and
/// `free` drops the buffer.
#[derive(Debug, Default)]
pub struct HeapPool;

impl BufferPool for HeapPool {
    fn alloc(&self, size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    fn free(&self, buf: Vec<u8>) {
        drop(buf);
    }
}

impl PoolProvider for HeapPool {
    fn create(&self, _cancel: &CancellationToken) -> Arc<dyn BufferPool> {
        Arc::new(HeapPool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_pool_alloc_size() {
        let pool = HeapPool;
        let buf = pool.alloc(1024);
        assert_eq!(buf.len(), 1024);
        assert!(buf.iter().all(|&b| b == 0));
        pool.free(buf);
    }

    #[test]
    fn test_heap_pool_provider() {
        let provider = HeapPool;
        let cancel = CancellationToken::new();
        let pool = provider.create(&cancel);
        let buf = pool.alloc(16);
        assert_eq!(buf.len(), 16);
        pool.free(buf);
    }
}

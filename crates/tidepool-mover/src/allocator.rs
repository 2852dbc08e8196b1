//! Repository space accounting
//!
//! Movers never write into unaccounted space. An [`Allocator`] hands out
//! byte grants against a pool-wide capacity; [`PoolAllocator`] is the
//! standard implementation, a thin layer over the weighted semaphore so
//! capacity can be resized at runtime without disturbing existing grants.

use async_trait::async_trait;

use crate::error::Result;
use crate::semaphore::AdjustableSemaphore;

/// Grants and returns repository space in bytes.
#[async_trait]
pub trait Allocator: Send + Sync + 'static {
    /// Block until `bytes` of space can be granted.
    async fn allocate(&self, bytes: u64) -> Result<()>;

    /// Grant `bytes` immediately, or refuse without waiting.
    fn try_allocate(&self, bytes: u64) -> bool;

    /// Return previously granted space.
    fn free(&self, bytes: u64);
}

/// Space accounting for one pool.
pub struct PoolAllocator {
    space: AdjustableSemaphore,
}

impl PoolAllocator {
    /// Create an allocator managing `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        Self {
            space: AdjustableSemaphore::new(capacity),
        }
    }

    /// Total managed capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.space.max_permits()
    }

    /// Bytes currently granted.
    pub fn used(&self) -> u64 {
        self.space.used_permits()
    }

    /// Bytes available for new grants.
    pub fn free_space(&self) -> u64 {
        self.space.available_permits()
    }

    /// Resize the managed capacity. Shrinking below the currently granted
    /// amount only delays new grants; existing grants are never revoked.
    pub fn set_capacity(&self, capacity: u64) {
        self.space.set_max_permits(capacity);
    }
}

#[async_trait]
impl Allocator for PoolAllocator {
    async fn allocate(&self, bytes: u64) -> Result<()> {
        self.space.acquire(bytes).await;
        Ok(())
    }

    fn try_allocate(&self, bytes: u64) -> bool {
        self.space.try_acquire(bytes)
    }

    fn free(&self, bytes: u64) {
        self.space.release(bytes);
    }
}

static_assertions::assert_impl_all!(PoolAllocator: Send, Sync);

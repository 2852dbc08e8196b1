//! Space-aware repository channels
//!
//! A [`RepositoryChannel`] is the positional read/write surface a mover
//! drives. [`AllocatingChannel`] wraps any channel and reserves repository
//! space ahead of writes in coarse increments, so a transfer of unknown
//! length touches the allocator a handful of times instead of once per
//! write. Surplus reservation is returned when the channel closes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::allocator::Allocator;
use crate::error::{Error, Result};

/// Space is reserved ahead of writes in steps of this many bytes.
pub const SPACE_INCREMENT: u64 = 50 * 1024 * 1024;

/// How a channel reacts when a write outruns its reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocPolicy {
    /// Block the write until the allocator can grant more space.
    Hard,
    /// Fail the write immediately when space is not available.
    Soft,
}

/// Positional byte-level access to one repository entry.
#[async_trait]
pub trait RepositoryChannel: Send + Sync + 'static {
    /// Read up to `length` bytes starting at `position`. Reads past the end
    /// of the entry return a short or empty buffer.
    async fn read_at(&self, position: u64, length: usize) -> Result<Bytes>;

    /// Write `data` at `position`, extending the entry as needed. Returns
    /// the number of bytes written.
    async fn write_at(&self, position: u64, data: &[u8]) -> Result<usize>;

    /// Current size of the entry in bytes.
    async fn size(&self) -> Result<u64>;

    /// Set the entry length, discarding data past `length`.
    async fn truncate(&self, length: u64) -> Result<()>;

    /// Flush buffered data to stable storage.
    async fn sync(&self) -> Result<()>;

    /// Close the channel. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;

    /// Whether the channel still accepts operations.
    fn is_open(&self) -> bool;
}

/// In-memory channel used by tests and the p2p staging path.
pub struct MemoryChannel {
    data: Mutex<BytesMut>,
    open: AtomicBool,
}

impl MemoryChannel {
    /// Create an empty open channel.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BytesMut::new()),
            open: AtomicBool::new(true),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::ChannelClosed)
        }
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepositoryChannel for MemoryChannel {
    async fn read_at(&self, position: u64, length: usize) -> Result<Bytes> {
        self.ensure_open()?;
        let data = self.data.lock();
        let start = position.min(data.len() as u64) as usize;
        let end = (start + length).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    async fn write_at(&self, position: u64, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let mut buf = self.data.lock();
        let start = position as usize;
        let end = start + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    async fn size(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.data.lock().len() as u64)
    }

    async fn truncate(&self, length: u64) -> Result<()> {
        self.ensure_open()?;
        let mut buf = self.data.lock();
        let length = length as usize;
        if buf.len() > length {
            buf.truncate(length);
        } else {
            buf.resize(length, 0);
        }
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Channel wrapper that keeps writes covered by a space reservation.
pub struct AllocatingChannel<C> {
    inner: C,
    allocator: Arc<dyn Allocator>,
    policy: AllocPolicy,
    /// Serializes writers so the reservation arithmetic stays consistent.
    write_lock: tokio::sync::Mutex<()>,
    allocated: AtomicU64,
    bytes_transferred: AtomicU64,
    started: Instant,
    last_transferred: Mutex<Instant>,
}

impl<C: RepositoryChannel> AllocatingChannel<C> {
    /// Wrap `inner`, charging reservations against `allocator`.
    pub fn new(inner: C, allocator: Arc<dyn Allocator>, policy: AllocPolicy) -> Self {
        Self {
            inner,
            allocator,
            policy,
            write_lock: tokio::sync::Mutex::new(()),
            allocated: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            started: Instant::now(),
            last_transferred: Mutex::new(Instant::now()),
        }
    }

    /// Reservation policy of this channel.
    pub fn policy(&self) -> AllocPolicy {
        self.policy
    }

    /// Bytes currently reserved with the allocator.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Total bytes moved through this channel in either direction.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Acquire)
    }

    /// Time since the channel was created.
    pub fn transfer_time(&self) -> Duration {
        self.started.elapsed()
    }

    /// Instant of the most recent read or write, for idle detection.
    pub fn last_transferred(&self) -> Instant {
        *self.last_transferred.lock()
    }

    /// Grow the reservation to cover `required` bytes. Caller holds the
    /// write lock.
    async fn preallocate(&self, required: u64) -> Result<()> {
        let allocated = self.allocated.load(Ordering::Acquire);
        if required <= allocated {
            return Ok(());
        }
        let delta = (required - allocated).max(SPACE_INCREMENT);
        match self.policy {
            AllocPolicy::Hard => self.allocator.allocate(delta).await?,
            AllocPolicy::Soft => {
                if !self.allocator.try_allocate(delta) {
                    return Err(Error::OutOfSpace);
                }
            }
        }
        debug!(delta, total = allocated + delta, "reservation grown");
        self.allocated.store(allocated + delta, Ordering::Release);
        Ok(())
    }

    fn record_transfer(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::AcqRel);
        *self.last_transferred.lock() = Instant::now();
    }
}

#[async_trait]
impl<C: RepositoryChannel> RepositoryChannel for AllocatingChannel<C> {
    async fn read_at(&self, position: u64, length: usize) -> Result<Bytes> {
        let data = self.inner.read_at(position, length).await?;
        self.record_transfer(data.len() as u64);
        Ok(data)
    }

    async fn write_at(&self, position: u64, data: &[u8]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.preallocate(position.saturating_add(data.len() as u64))
            .await?;
        let written = self.inner.write_at(position, data).await?;
        self.record_transfer(written as u64);
        Ok(written)
    }

    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    async fn truncate(&self, length: u64) -> Result<()> {
        self.inner.truncate(length).await
    }

    async fn sync(&self) -> Result<()> {
        self.inner.sync().await
    }

    async fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.inner.is_open() {
            let size = self.inner.size().await?;
            let allocated = self.allocated.load(Ordering::Acquire);
            if allocated > size {
                self.allocator.free(allocated - size);
                self.allocated.store(size, Ordering::Release);
                debug!(surplus = allocated - size, "surplus reservation returned");
            }
        }
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

static_assertions::assert_impl_all!(AllocatingChannel<MemoryChannel>: Send, Sync);

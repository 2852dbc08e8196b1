//! The mover contract and its scheduling metadata
//!
//! A mover is one active data transfer against a pool's storage. The
//! scheduler owns a mover from admission until its post-processing completes;
//! the transfer itself is opaque behind the [`Mover`] trait. Cancellation is
//! cooperative: the scheduler hands every execution a [`CancelToken`] and the
//! transfer is expected to observe it at well-defined points.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::Result;

/// Failure code reported when a transfer is killed before or during execution.
pub const TRANSFER_KILLED: i32 = 1;

/// Priority class of a transfer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    /// Background transfers (restores, replication)
    Low,
    /// Ordinary client transfers
    #[default]
    Regular,
    /// Latency-sensitive transfers
    High,
}

/// Phase of an admitted mover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoverPhase {
    /// Waiting in the priority queue for a concurrency slot
    Queued,
    /// Transfer in progress
    Running,
    /// Kill requested; post-processing pending
    Canceled,
    /// Post-processing finished, record about to be dropped
    Done,
}

impl fmt::Display for MoverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MoverPhase::Queued => "QUEUED",
            MoverPhase::Running => "RUNNING",
            MoverPhase::Canceled => "CANCELED",
            MoverPhase::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// Identifier of an admitted mover.
///
/// The scheduler's own queue id occupies the high byte so that ids stay
/// globally distinguishable across scheduler instances sharing one id space:
/// `| 31 - queue id - 24 | 23 - sequence - 0 |`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MoverId(u32);

impl MoverId {
    pub(crate) fn new(queue_id: u8, sequence: u32) -> Self {
        Self(u32::from(queue_id) << 24 | (sequence & 0x00FF_FFFF))
    }

    /// Queue id embedded in the high bits.
    pub fn queue_id(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Per-queue sequence number.
    pub fn sequence(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Raw combined id.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MoverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation token passed to every executing mover.
///
/// A kill request is advisory: the transfer must check the token (or await
/// [`CancelToken::cancelled`]) and terminate promptly. The scheduler never
/// forcibly terminates the underlying task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// One data transfer, executable by the scheduler.
#[async_trait]
pub trait Mover: Send + Sync + 'static {
    /// Run the transfer to completion.
    ///
    /// `cancel` is triggered when the mover is killed; the implementation
    /// should return promptly once it observes the token, reporting
    /// [`crate::Error::TransferKilled`].
    async fn execute(&self, cancel: CancelToken) -> Result<()>;

    /// Post-processing hook, invoked exactly once after the transfer ends,
    /// whether it succeeded, failed or was cancelled. Closing the mover's
    /// channel belongs here.
    async fn close(&self) -> Result<()>;

    /// Record a failure status on the transfer (e.g. when killed before it
    /// ever started executing).
    fn set_failure(&self, code: i32, message: &str);

    /// Bytes moved so far, for introspection.
    fn bytes_transferred(&self) -> u64;
}

/// Introspection record for one admitted mover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoverInfo {
    /// Combined mover id
    pub id: MoverId,
    /// Name of the owning queue
    pub queue: String,
    /// Current phase
    pub phase: MoverPhase,
    /// Priority class
    pub priority: Priority,
    /// When the mover was admitted
    pub submitted_at: DateTime<Utc>,
    /// When the transfer started, if it has
    pub started_at: Option<DateTime<Utc>>,
    /// Bytes moved so far
    pub bytes_transferred: u64,
}

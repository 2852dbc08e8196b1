//! # tidepool-mover: Pool-Side Transfer Execution
//!
//! The pool-side half of the transfer pipeline: once a pool has been chosen
//! for a file, a *mover* carries the bytes. This crate admits movers through
//! priority queues with adjustable concurrency, and keeps every write
//! covered by a repository space reservation:
//!
//! - **Scheduling**: per-queue priority admission, FIFO or LIFO tie-break
//! - **Concurrency**: runtime-adjustable limits that never preempt
//! - **Space**: incremental reservation ahead of writes, surplus returned
//! - **Lifecycle**: cooperative cancellation and bounded-grace shutdown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidepool_mover::{MoverScheduler, Priority, QueueOrder};
//!
//! # async fn example(mover: Arc<dyn tidepool_mover::Mover>) -> tidepool_mover::Result<()> {
//! let scheduler = MoverScheduler::new("regular", 0, QueueOrder::Fifo);
//! scheduler.set_max_active(4);
//!
//! let id = scheduler.add(mover, Priority::Regular)?;
//! println!("admitted mover {id}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod allocator;
pub mod channel;
pub mod error;
pub mod mover;
pub mod queue;
pub mod scheduler;
pub mod semaphore;

pub use allocator::{Allocator, PoolAllocator};
pub use channel::{AllocPolicy, AllocatingChannel, MemoryChannel, RepositoryChannel, SPACE_INCREMENT};
pub use error::{Error, Result};
pub use mover::{CancelToken, Mover, MoverId, MoverInfo, MoverPhase, Priority, TRANSFER_KILLED};
pub use queue::QueueOrder;
pub use scheduler::MoverScheduler;
pub use semaphore::AdjustableSemaphore;

//! # tidepool-select: Pool Selection and Request Deduplication
//!
//! The door-side half of the transfer pipeline: given a file and an intent,
//! decide which pool serves it. Concurrent requests for one file collapse
//! into a single state machine that answers every merged caller exactly
//! once:
//!
//! - **Dedup**: one live machine per file identity, enforced by the
//!   coordinator's table
//! - **Fallbacks**: denied reads fall back to pool-to-pool replication,
//!   missing replicas to staging from archive
//! - **At most one sub-request**: a parked file has a single staging or
//!   replication message outstanding, however many callers merged
//! - **Events**: completions and pool recoveries wake parked machines
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidepool_select::{RequestIntent, SelectionCoordinator};
//!
//! # async fn example(
//! #     monitor: Arc<dyn tidepool_select::PoolMonitor>,
//! #     messenger: Arc<dyn tidepool_select::PoolMessenger>,
//! #     attrs: tidepool_select::FileAttributes,
//! # ) -> tidepool_select::Result<()> {
//! let coordinator = SelectionCoordinator::new(monitor, messenger);
//! let reply = coordinator.submit(attrs, RequestIntent::Read)?;
//! let outcome = reply.await;
//! println!("selection resolved: {outcome:?}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod coordinator;
pub mod error;
pub mod request;
pub mod selector;
pub mod transport;
pub mod types;

pub use coordinator::SelectionCoordinator;
pub use error::{Error, Result};
pub use request::{SelectRequestInfo, SelectionState};
pub use selector::{PoolMonitor, PoolSelector, SelectError, SelectResult};
pub use transport::{PoolMessenger, TransportError, TransportResult};
pub use types::{
    AccessClass, FileAttributes, FileId, P2pPair, RequestIntent, RetentionClass, SelectedPool,
    SelectionOutcome, UnavailableReason,
};

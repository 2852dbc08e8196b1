//! Pool selection boundary
//!
//! All cost and locality logic lives behind [`PoolSelector`]. The state
//! machine only interprets the typed failures: a denial triggers the
//! replication fallback, a missing replica triggers staging, and a cost
//! limit is surfaced to the caller unretried.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{FileAttributes, P2pPair, RequestIntent, SelectedPool};

/// Typed failures from a selector call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    /// Policy forbids this access from the requested door.
    #[error("permission denied")]
    PermissionDenied,

    /// The replica expected at a location is no longer there.
    #[error("replica not in cache")]
    NotInCache,

    /// Every candidate pool exceeds the configured cost limit.
    #[error("cost limit exceeded: {0}")]
    CostExceeded(String),

    /// Anything else; diagnostic message only.
    #[error("{0}")]
    Other(String),
}

/// Result alias for selector calls.
pub type SelectResult<T> = std::result::Result<T, SelectError>;

/// Chooses pools for one file under the current cost model.
#[async_trait]
pub trait PoolSelector: Send + Sync + 'static {
    /// Pick a pool holding a readable replica.
    async fn select_read_pool(&self, attrs: &FileAttributes) -> SelectResult<SelectedPool>;

    /// Pick a pool for a new replica of `preallocated` bytes.
    async fn select_write_pool(
        &self,
        attrs: &FileAttributes,
        preallocated: u64,
    ) -> SelectResult<SelectedPool>;

    /// Pick a pool to stage the archival copy onto. `previous` names the
    /// pool a failed attempt used, so the retry lands elsewhere.
    async fn select_stage_pool(
        &self,
        attrs: &FileAttributes,
        previous: Option<&SelectedPool>,
    ) -> SelectResult<SelectedPool>;

    /// Pick source and destination for a pool-to-pool copy. `force`
    /// relaxes the destination cost limit.
    async fn select_replication_pair(
        &self,
        attrs: &FileAttributes,
        force: bool,
    ) -> SelectResult<P2pPair>;
}

/// Source of per-request selectors, snapshotting the pool topology at the
/// moment a request arrives.
pub trait PoolMonitor: Send + Sync + 'static {
    /// Build a selector for one file and intent.
    fn pool_selector(&self, attrs: &FileAttributes, intent: RequestIntent)
        -> Arc<dyn PoolSelector>;
}

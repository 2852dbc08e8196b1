//! Outbound messaging boundary
//!
//! Staging and replication are carried out by pools; the coordinator only
//! sends them a request and later receives a completion event correlated by
//! file identity. The wire format is the messenger's business.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{FileAttributes, P2pPair, SelectedPool};

/// Failure to deliver a request to a pool.
#[derive(Error, Debug, Clone)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Result alias for messenger calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Delivers staging and replication requests to pools.
#[async_trait]
pub trait PoolMessenger: Send + Sync + 'static {
    /// Ask `pool` to stage the archival copy of the file.
    async fn send_stage_request(
        &self,
        pool: &SelectedPool,
        attrs: &FileAttributes,
    ) -> TransportResult<()>;

    /// Ask the destination of `pair` to pull a replica from the source.
    async fn send_replication_request(
        &self,
        pair: &P2pPair,
        attrs: &FileAttributes,
    ) -> TransportResult<()>;
}

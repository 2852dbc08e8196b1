//! Error types for tidepool-mover

use thiserror::Error;

use crate::mover::MoverId;

/// Result type for tidepool-mover operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tidepool-mover
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduler is shutting down and rejects new movers
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// Mover not found
    #[error("mover not found: {0}")]
    NotFound(MoverId),

    /// Allocator could not satisfy a non-blocking space reservation
    #[error("out of space")]
    OutOfSpace,

    /// Channel was closed, or space allocation was interrupted
    #[error("channel closed")]
    ChannelClosed,

    /// Transfer was killed before or during execution
    #[error("transfer was killed")]
    TransferKilled,

    /// Mover reported a transfer failure
    #[error("mover failed: {0}")]
    Mover(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for the selection coordinator

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by coordinator entry points. Selection failures are not
/// errors; they reach callers as a typed [`crate::SelectionOutcome`].
#[derive(Error, Debug)]
pub enum Error {
    /// The coordinator no longer accepts requests.
    #[error("selection coordinator is shutting down")]
    ShuttingDown,
}

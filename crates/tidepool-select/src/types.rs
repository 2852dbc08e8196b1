//! Core data model for pool selection

use std::fmt;

use serde::{Deserialize, Serialize};

/// Globally unique file identifier, the deduplication key for selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Wrap an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Whether a file has an archival copy to fall back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionClass {
    /// Archived; recoverable by staging even when no pool holds a replica.
    Custodial,
    /// Disk-only; gone for good once the last replica is lost.
    Replica,
}

/// Expected access latency of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessClass {
    /// A replica is expected on disk.
    Online,
    /// May only exist on archival media.
    Nearline,
}

/// Immutable-per-request snapshot of the file metadata that drives
/// selection. The caller supplies it; selection only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttributes {
    /// File identity.
    pub id: FileId,
    /// Size in bytes, used for write placement.
    pub size: u64,
    /// Retention class.
    pub retention: RetentionClass,
    /// Access class.
    pub access: AccessClass,
    /// Pools known to hold a replica.
    pub locations: Vec<String>,
    /// Whether the archival copy is confirmed written.
    pub stored: bool,
}

/// What the caller wants done with the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestIntent {
    /// Pick a pool to read from.
    Read,
    /// Pick a pool to write a new replica to.
    Write,
    /// Pick a pool to read from, favoring a fresh replica.
    Replicate,
}

/// The pool a resolved request should be directed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedPool {
    /// Pool name.
    pub name: String,
    /// Transport address of the pool.
    pub address: String,
}

impl fmt::Display for SelectedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Source and destination of a pool-to-pool copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pPair {
    /// Pool the replica is copied from.
    pub source: SelectedPool,
    /// Pool the new replica lands on.
    pub destination: SelectedPool,
}

/// Why no usable copy is currently reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// All pools holding the file are down; retryable once one recovers.
    NoOnlinePools,
    /// No replica and no archival copy; permanent.
    Lost,
}

/// The one typed answer every caller receives, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "detail")]
pub enum SelectionOutcome {
    /// A pool was chosen; direct the transfer there.
    Selected(SelectedPool),
    /// Policy forbids this access and no fallback succeeded.
    PermissionDenied,
    /// No usable copy is reachable.
    Unavailable(UnavailableReason),
    /// A resource or cost limit was hit; not retried internally.
    ResourceExceeded(String),
    /// Locations changed while the request was parked; resubmit with
    /// fresh metadata.
    OutOfDate,
    /// Internal failure; the message is diagnostic only.
    Failed(String),
}

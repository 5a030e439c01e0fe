//! Sharding error types

use thiserror::Error;

/// Errors raised while building or querying a ring
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// Lookup on a ring that holds no shards. Rings must be initialized with
    /// at least one shard before use.
    #[error("Ring has no shards: at least one shard is required before lookups")]
    EmptyRing,

    #[error("Static shard list is empty")]
    EmptyShardList,

    #[error("Invalid shard weight: {0} (must be > 0)")]
    InvalidWeight(u32),

    #[error("Invalid key tag pattern: {0}")]
    InvalidKeyTagPattern(String),

    #[error("Invalid shard spec: {0}")]
    InvalidShardSpec(String),
}

/// Errors reported by a backend handle
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Resource is not connected")]
    NotConnected,

    #[error("Unexpected health check reply: {0}")]
    UnexpectedReply(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors raised by the ring pool
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool is closed")]
    Closed,

    #[error("Failed to create pooled ring: {0}")]
    Create(#[from] ShardError),

    #[error("Pooled ring failed validation")]
    ValidationFailed,
}

//! Error types
//!
//! Errors surfaced by the ring, the registry and the ring pool.

mod types;

pub use types::{PoolError, ResourceError, ShardError};

//! Consistent-hash shard routing library

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod services;

// Re-export commonly used types
pub use config::Settings;
pub use error::{PoolError, ResourceError, ShardError};
pub use services::{
    ShardInfo, ShardRegistry, ShardResource, ShardedRing, ShardedRingFactory, ShardedRingPool,
};

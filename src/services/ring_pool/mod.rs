//! Ring Pool Module
//!
//! This module bridges sharded rings to a generic pooled-object contract, so
//! rings can be handed out, returned and health-checked like any other
//! pooled connection.
//!
//! # Features
//! - `PooledObjectFactory`: create / destroy / validate / activate / passivate
//! - `ShardedRingFactory`: builds rings from a static list or a live registry
//! - Destruction and validation never propagate backend failures
//! - `ObjectPool`: a small idle-list pool over any factory
//!
//! # Example
//! ```ignore
//! use shard_ring::services::ring_pool::{PoolConfig, ShardedRingFactory, ShardedRingPool};
//!
//! let factory = ShardedRingFactory::from_registry(registry, RingConfig::default());
//! let pool = ShardedRingPool::new(factory, PoolConfig::default().with_test_on_borrow(true));
//!
//! let ring = pool.borrow().await?;
//! let client = ring.resource_for_key("user{42}:profile")?;
//! pool.return_object(ring).await;
//! ```

mod factory;
mod pool;

pub use factory::{PooledObjectFactory, ShardedRingFactory};
pub use pool::{ObjectPool, PoolConfig, PoolStats, ShardedRingPool};

//! Services module
//!
//! Contains the sharding core and the pool adapter built on top of it.

pub mod ring_pool;
pub mod sharding;

pub use ring_pool::{
    ObjectPool, PoolConfig, PoolStats, PooledObjectFactory, ShardedRingFactory,
    ShardedRingPool,
};
pub use sharding::{
    HashAlgorithm, Hashing, KeyTagPattern, MembershipBatch, MembershipListener, RegistryStats,
    ResourceFactory, RingConfig, RingSnapshot, ShardId, ShardInfo, ShardRegistry, ShardResource,
    ShardedRing, SharedHasher, SubscriberId,
};

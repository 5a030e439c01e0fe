//! Sharding Module
//!
//! This module routes keys to backend shards with a consistent-hash ring and
//! keeps rings in sync with a live, mutable shard registry.
//!
//! # Features
//! - Virtual nodes (160 per unit of weight) for even key distribution
//! - Ceiling lookup with wrap-around, so only keys owned by a departing shard move
//! - Key tags (`user{42}:profile`) to co-locate related keys
//! - Lock-free lookups: rings publish immutable snapshots on every rebuild
//! - A registry that fans membership changes out to every subscribed ring
//!
//! # Example
//! ```ignore
//! use shard_ring::services::sharding::{RingConfig, ShardInfo, ShardRegistry, ShardedRing};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ShardRegistry::with_shards(vec![
//!     ShardInfo::named("cache-a", || Client::connect("10.0.0.1:6379")),
//!     ShardInfo::named("cache-b", || Client::connect("10.0.0.2:6379")),
//! ]));
//!
//! let ring = ShardedRing::with_registry(&registry, RingConfig::default().with_default_key_tag());
//! let client = ring.resource_for_key("user{42}:profile")?;
//!
//! // Rings subscribed to the registry rebuild on every committed change
//! registry.add_shard(ShardInfo::named("cache-c", || Client::connect("10.0.0.3:6379")));
//! ```

mod hashing;
mod key_tag;
mod registry;
mod ring;
mod shard;

pub use hashing::{HashAlgorithm, Hashing, SharedHasher};
pub use key_tag::{KeyTagPattern, DEFAULT_KEY_TAG_PATTERN};
pub use registry::{
    MembershipBatch, MembershipListener, RegistryStats, ShardRegistry, SubscriberId,
};
pub use ring::{RingConfig, RingSnapshot, ShardedRing};
pub use shard::{
    ResourceFactory, ShardId, ShardInfo, ShardResource, DEFAULT_WEIGHT, VNODES_PER_WEIGHT,
};

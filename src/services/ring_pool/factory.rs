//! Pooled ring factory
//!
//! Creates, destroys and validates `ShardedRing` instances on behalf of an
//! object pool.

use crate::error::PoolError;
use crate::services::sharding::{
    RingConfig, RingSnapshot, ShardInfo, ShardRegistry, ShardResource, ShardedRing,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

// ============================================================================
// Pooled Object Contract
// ============================================================================

/// Lifecycle hooks a pool drives for the objects it manages
#[async_trait]
pub trait PooledObjectFactory: Send + Sync {
    type Object: Send + Sync;

    /// Create a new object
    async fn make_object(&self) -> Result<Self::Object, PoolError>;

    /// Release everything the object holds. Must not fail.
    async fn destroy_object(&self, object: &Self::Object);

    /// Health-check the object
    async fn validate_object(&self, object: &Self::Object) -> bool;

    /// Prepare an object before it is handed out
    async fn activate_object(&self, _object: &Self::Object) -> Result<(), PoolError> {
        Ok(())
    }

    /// Reset an object before it goes back to the idle list
    async fn passivate_object(&self, _object: &Self::Object) -> Result<(), PoolError> {
        Ok(())
    }
}

// ============================================================================
// Sharded Ring Factory
// ============================================================================

/// Where a factory's rings get their shards from
enum ShardSource<R> {
    /// A fixed list; rings never change
    Static(Vec<ShardInfo<R>>),
    /// A live registry; rings subscribe and rebuild on changes
    Registry(Arc<ShardRegistry<R>>),
}

/// Builds `ShardedRing`s for a pool
pub struct ShardedRingFactory<R> {
    source: ShardSource<R>,
    config: RingConfig,
}

impl<R> ShardedRingFactory<R> {
    pub fn from_shards(shards: Vec<ShardInfo<R>>, config: RingConfig) -> Self {
        Self {
            source: ShardSource::Static(shards),
            config,
        }
    }

    pub fn from_registry(registry: Arc<ShardRegistry<R>>, config: RingConfig) -> Self {
        Self {
            source: ShardSource::Registry(registry),
            config,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.source, ShardSource::Registry(_))
    }
}

#[async_trait]
impl<R: ShardResource + 'static> PooledObjectFactory for ShardedRingFactory<R> {
    type Object = Arc<ShardedRing<R>>;

    async fn make_object(&self) -> Result<Self::Object, PoolError> {
        let ring = match &self.source {
            ShardSource::Static(shards) => {
                Arc::new(ShardedRing::new(shards.clone(), self.config.clone())?)
            }
            ShardSource::Registry(registry) => {
                ShardedRing::with_registry(registry, self.config.clone())
            }
        };
        tracing::debug!(
            dynamic = ring.is_dynamic(),
            shards = ring.all_shards().len(),
            "Created pooled ring"
        );
        Ok(ring)
    }

    /// Unsubscribes first, then shuts down every resource the ring holds,
    /// including those of snapshots replaced by earlier rebuilds.
    ///
    /// `detach` waits for a rebuild in progress, so the snapshot read
    /// afterwards is the last one the ring will ever publish.
    async fn destroy_object(&self, ring: &Self::Object) {
        ring.detach();

        let mut snapshots = ring.drain_retired();
        snapshots.push(ring.snapshot());
        for snapshot in &snapshots {
            shutdown_snapshot(snapshot).await;
        }
    }

    /// Shuts down the resources of snapshots replaced while the ring was out
    async fn passivate_object(&self, ring: &Self::Object) -> Result<(), PoolError> {
        let retired = ring.drain_retired();
        if !retired.is_empty() {
            tracing::debug!(snapshots = retired.len(), "Releasing resources of replaced ring builds");
        }
        for snapshot in &retired {
            shutdown_snapshot(snapshot).await;
        }
        Ok(())
    }

    /// True only if every resource answers its ping
    async fn validate_object(&self, ring: &Self::Object) -> bool {
        let snapshot = ring.snapshot();
        for (shard, resource) in snapshot.shards().iter().zip(snapshot.resources()) {
            match AssertUnwindSafe(resource.ping()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(shard = %shard.label(), error = %e, "Shard failed validation");
                    return false;
                }
                Err(_) => {
                    tracing::warn!(shard = %shard.label(), "Shard panicked during validation");
                    return false;
                }
            }
        }
        true
    }
}

async fn shutdown_snapshot<R: ShardResource>(snapshot: &RingSnapshot<R>) {
    for (shard, resource) in snapshot.shards().iter().zip(snapshot.resources()) {
        shutdown_resource(&shard.label(), resource.as_ref()).await;
    }
}

/// Quit then close, swallowing failures and panics of either step
async fn shutdown_resource<R: ShardResource>(shard: &str, resource: &R) {
    if !resource.is_connected() {
        return;
    }

    match AssertUnwindSafe(resource.quit()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(shard, error = %e, "Quit failed, closing anyway"),
        Err(_) => tracing::warn!(shard, "Quit panicked, closing anyway"),
    }

    match AssertUnwindSafe(resource.close()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(shard, error = %e, "Failed to close shard resource"),
        Err(_) => tracing::warn!(shard, "Close panicked"),
    }
}

// ============================================================================
// Tests
// ============================================================================

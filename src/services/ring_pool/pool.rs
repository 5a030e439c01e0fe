//! Object Pool Implementation
//!
//! A small idle-list pool over any `PooledObjectFactory`. Objects are created
//! on demand, kept idle up to `max_idle`, and destroyed through the factory
//! when they are invalid, surplus, or the pool is closed.

use super::factory::{PooledObjectFactory, ShardedRingFactory};
use crate::error::PoolError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

// ============================================================================
// Pool Configuration
// ============================================================================

/// Configuration for object pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle objects kept for reuse
    pub max_idle: usize,
    /// Validate objects before handing them out
    pub test_on_borrow: bool,
    /// Validate objects before putting them back on the idle list
    pub test_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 8,
            test_on_borrow: false,
            test_on_return: false,
        }
    }
}

impl PoolConfig {
    pub fn new(max_idle: usize) -> Self {
        Self {
            max_idle,
            ..Default::default()
        }
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn with_test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }
}

// ============================================================================
// Object Pool
// ============================================================================

/// Pool of sharded rings
pub type ShardedRingPool<R> = ObjectPool<ShardedRingFactory<R>>;

/// A pool of factory-made objects
///
/// The idle list is guarded by a std mutex that is never held across an
/// await point; factory hooks always run outside it.
pub struct ObjectPool<F: PooledObjectFactory> {
    factory: F,
    config: PoolConfig,
    idle: Mutex<VecDeque<F::Object>>,
    closed: AtomicBool,
    active: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl<F: PooledObjectFactory> ObjectPool<F> {
    /// Create a new pool
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Borrow an object, reusing an idle one when possible
    ///
    /// Idle objects that fail activation or validation are destroyed and the
    /// next one is tried. A freshly created object that fails is reported as
    /// an error.
    pub async fn borrow(&self) -> Result<F::Object, PoolError> {
        loop {
            if self.is_closed() {
                return Err(PoolError::Closed);
            }

            let (object, fresh) = match self.pop_idle() {
                Some(object) => (object, false),
                None => {
                    let object = self.factory.make_object().await?;
                    self.created.fetch_add(1, Ordering::Relaxed);
                    (object, true)
                }
            };

            match self.prepare(&object).await {
                Ok(()) => {
                    self.active.fetch_add(1, Ordering::AcqRel);
                    return Ok(object);
                }
                Err(e) => {
                    self.destroy(object).await;
                    if fresh {
                        return Err(e);
                    }
                    tracing::debug!(error = %e, "Discarded idle object, trying another");
                }
            }
        }
    }

    /// Hand an object back to the pool
    pub async fn return_object(&self, object: F::Object) {
        self.release_active();

        if self.is_closed() {
            self.destroy(object).await;
            return;
        }

        if let Err(e) = self.factory.passivate_object(&object).await {
            tracing::warn!(error = %e, "Failed to passivate returned object");
            self.destroy(object).await;
            return;
        }

        if self.config.test_on_return && !self.factory.validate_object(&object).await {
            tracing::warn!("Returned object failed validation");
            self.destroy(object).await;
            return;
        }

        let surplus = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            if idle.len() < self.config.max_idle {
                idle.push_back(object);
                None
            } else {
                Some(object)
            }
        };

        if let Some(object) = surplus {
            self.destroy(object).await;
        }
    }

    /// Destroy a borrowed object that turned out to be broken
    pub async fn invalidate(&self, object: F::Object) {
        self.release_active();
        self.destroy(object).await;
    }

    /// Refuse further borrows and destroy every idle object
    ///
    /// Objects still on loan are destroyed as they come back.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained: Vec<F::Object> = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            idle.drain(..).collect()
        };

        tracing::info!(idle = drained.len(), "Closing object pool");
        for object in drained {
            self.destroy(object).await;
        }
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.lock().unwrap_or_else(PoisonError::into_inner).len(),
            active: self.active.load(Ordering::Acquire),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    fn pop_idle(&self) -> Option<F::Object> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    async fn prepare(&self, object: &F::Object) -> Result<(), PoolError> {
        self.factory.activate_object(object).await?;
        if self.config.test_on_borrow && !self.factory.validate_object(object).await {
            return Err(PoolError::ValidationFailed);
        }
        Ok(())
    }

    fn release_active(&self) {
        // saturating: objects not borrowed from this pool may be handed in
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    async fn destroy(&self, object: F::Object) {
        self.factory.destroy_object(&object).await;
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

impl<F: PooledObjectFactory> std::fmt::Debug for ObjectPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

/// Statistics about an object pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects waiting on the idle list
    pub idle: usize,
    /// Objects currently on loan
    pub active: usize,
    /// Objects created over the pool's lifetime
    pub created: u64,
    /// Objects destroyed over the pool's lifetime
    pub destroyed: u64,
    /// Whether the pool has been closed
    pub closed: bool,
}

impl PoolStats {
    /// Check if the pool can still hand out objects
    pub fn is_healthy(&self) -> bool {
        !self.closed
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::factory::tests::{mock_shard, MockResource, MockState};
    use super::*;
    use crate::services::sharding::{RingConfig, ShardRegistry};
    use std::sync::Arc;

    fn static_pool(config: PoolConfig) -> (ShardedRingPool<MockResource>, Arc<MockState>) {
        let (a, state) = mock_shard("a");
        let (b, _) = mock_shard("b");
        let factory = ShardedRingFactory::from_shards(vec![a, b], RingConfig::default());
        (ObjectPool::new(factory, config), state)
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new(2)
            .with_test_on_borrow(true)
            .with_test_on_return(true);
        assert_eq!(config.max_idle, 2);
        assert!(config.test_on_borrow);
        assert!(config.test_on_return);

        let default = PoolConfig::default();
        assert_eq!(default.max_idle, 8);
        assert!(!default.test_on_borrow);
        assert!(!default.test_on_return);
    }

    #[tokio::test]
    async fn test_returned_ring_is_reused() {
        let (pool, _) = static_pool(PoolConfig::default());

        let first = pool.borrow().await.unwrap();
        assert_eq!(pool.stats().active, 1);
        pool.return_object(Arc::clone(&first)).await;
        assert_eq!(pool.stats().idle, 1);

        let second = pool.borrow().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_zero_max_idle_destroys_on_return() {
        let (pool, state) = static_pool(PoolConfig::new(0));

        let ring = pool.borrow().await.unwrap();
        pool.return_object(ring).await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_destroys_idle_and_refuses_borrows() {
        let (pool, state) = static_pool(PoolConfig::default());

        let ring = pool.borrow().await.unwrap();
        pool.return_object(ring).await;
        pool.close().await;

        assert!(pool.is_closed());
        assert!(!pool.stats().is_healthy());
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(pool.borrow().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_return_after_close_destroys() {
        let (pool, state) = static_pool(PoolConfig::default());

        let ring = pool.borrow().await.unwrap();
        pool.close().await;
        pool.return_object(ring).await;

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_borrow_rejects_unhealthy_ring() {
        let (pool, state) = static_pool(PoolConfig::default().with_test_on_borrow(true));
        state.unhealthy.store(true, Ordering::SeqCst);

        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, PoolError::ValidationFailed));
        assert_eq!(pool.stats().destroyed, 1);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn test_on_borrow_discards_stale_idle_ring() {
        let (a, state) = mock_shard("a");
        let registry = Arc::new(ShardRegistry::with_shards(vec![a]));
        let factory = ShardedRingFactory::from_registry(Arc::clone(&registry), RingConfig::default());
        let pool = ObjectPool::new(factory, PoolConfig::default().with_test_on_borrow(true));

        let ring = pool.borrow().await.unwrap();
        pool.return_object(ring).await;
        assert_eq!(registry.subscriber_count(), 1);

        // the idle ring now fails, and so does its replacement
        state.unhealthy.store(true, Ordering::SeqCst);
        assert!(pool.borrow().await.is_err());

        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.destroyed, 2);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_on_return_drops_unhealthy_ring() {
        let (pool, state) = static_pool(PoolConfig::default().with_test_on_return(true));

        let ring = pool.borrow().await.unwrap();
        state.unhealthy.store(true, Ordering::SeqCst);
        pool.return_object(ring).await;

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().destroyed, 1);
    }

    #[tokio::test]
    async fn test_invalidate_destroys_borrowed_ring() {
        let (pool, state) = static_pool(PoolConfig::default());

        let ring = pool.borrow().await.unwrap();
        pool.invalidate(ring).await;

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(state.quits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pooled_registry_ring_tracks_membership() {
        let (a, _) = mock_shard("a");
        let registry = Arc::new(ShardRegistry::with_shards(vec![a]));
        let factory = ShardedRingFactory::from_registry(Arc::clone(&registry), RingConfig::default());
        let pool = ObjectPool::new(factory, PoolConfig::default());

        let ring = pool.borrow().await.unwrap();
        pool.return_object(ring).await;

        let (b, _) = mock_shard("b");
        registry.add_shard(b);

        let ring = pool.borrow().await.unwrap();
        assert_eq!(ring.all_shards().len(), 2);
    }

    #[tokio::test]
    async fn test_return_releases_builds_replaced_while_on_loan() {
        let (a, state) = mock_shard("a");
        let registry = Arc::new(ShardRegistry::with_shards(vec![a]));
        let factory = ShardedRingFactory::from_registry(Arc::clone(&registry), RingConfig::default());
        let pool = ObjectPool::new(factory, PoolConfig::default());

        let ring = pool.borrow().await.unwrap();
        registry.add_shard(mock_shard("b").0);
        registry.add_shard(mock_shard("c").0);
        pool.return_object(ring).await;

        assert_eq!(pool.stats().idle, 1);
        assert_eq!(state.created.load(Ordering::SeqCst), 3);
        assert_eq!(state.closes.load(Ordering::SeqCst), 2);

        pool.close().await;
        assert_eq!(state.closes.load(Ordering::SeqCst), 3);
    }
}

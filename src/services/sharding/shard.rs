//! Shard descriptors and backend capabilities
//!
//! A `ShardInfo` describes one backend: an optional name, a weight and a
//! factory that produces the live handle the ring hands out for its keys.

use crate::error::{ResourceError, ShardError};
use async_trait::async_trait;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Weight given to shards that do not set one
pub const DEFAULT_WEIGHT: u32 = 1;

/// Virtual nodes generated per unit of weight
pub const VNODES_PER_WEIGHT: u32 = 160;

// ============================================================================
// Backend Capabilities
// ============================================================================

/// Produces the live handle for a shard
///
/// Called once per shard each time a ring is (re)built.
pub trait ResourceFactory<R>: Send + Sync {
    fn create_resource(&self) -> R;
}

impl<R, F> ResourceFactory<R> for F
where
    F: Fn() -> R + Send + Sync,
{
    fn create_resource(&self) -> R {
        self()
    }
}

/// Lifecycle operations the ring pool needs from a backend handle
#[async_trait]
pub trait ShardResource: Send + Sync {
    /// Whether the handle currently holds an open connection
    fn is_connected(&self) -> bool {
        true
    }

    /// Liveness probe; `Ok` means the backend answered as expected
    async fn ping(&self) -> Result<(), ResourceError>;

    /// Protocol-level goodbye sent before closing
    async fn quit(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ResourceError>;
}

// ============================================================================
// Shard Identity
// ============================================================================

/// Identity of a shard descriptor, shared by all of its clones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(Uuid);

impl ShardId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Shard Descriptor
// ============================================================================

/// Immutable description of one backend shard
///
/// Equality is by identity: a descriptor equals itself and its clones, never a
/// separately built descriptor with the same attributes. Replacing a shard with
/// a freshly built one is therefore always seen as a membership change.
pub struct ShardInfo<R> {
    id: ShardId,
    name: Option<Arc<str>>,
    weight: u32,
    factory: Arc<dyn ResourceFactory<R>>,
}

impl<R> ShardInfo<R> {
    /// Create an unnamed shard with the default weight
    ///
    /// Unnamed shards place their virtual nodes by list position, so their
    /// keys move whenever a shard ahead of them is removed. Prefer `named`
    /// for membership that changes at runtime.
    pub fn new(factory: impl ResourceFactory<R> + 'static) -> Self {
        Self {
            id: ShardId::new(),
            name: None,
            weight: DEFAULT_WEIGHT,
            factory: Arc::new(factory),
        }
    }

    /// Create a named shard with the default weight
    pub fn named(name: impl Into<String>, factory: impl ResourceFactory<R> + 'static) -> Self {
        Self::new(factory).with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Arc::from(name.into()));
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Result<Self, ShardError> {
        if weight == 0 {
            return Err(ShardError::InvalidWeight(weight));
        }
        self.weight = weight;
        Ok(self)
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name if present, otherwise the shard id
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => self.id.to_string(),
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Number of virtual nodes this shard places on a ring
    pub fn vnode_count(&self) -> u32 {
        VNODES_PER_WEIGHT * self.weight
    }

    /// Instantiate the backend handle
    pub fn create_resource(&self) -> R {
        self.factory.create_resource()
    }

    /// Hash input for virtual node `n`; `index` is the shard's position in
    /// the list the ring is built from.
    pub(crate) fn vnode_key(&self, index: usize, n: u32) -> String {
        match &self.name {
            Some(name) => format!("{}*{}", name, n),
            None => format!("SHARD-{}-NODE-{}", index, n),
        }
    }
}

impl<R> Clone for ShardInfo<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            weight: self.weight,
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<R> PartialEq for ShardInfo<R> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<R> Eq for ShardInfo<R> {}

impl<R> Hash for ShardInfo<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<R> fmt::Debug for ShardInfo<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Keep the first occurrence of each shard, preserving order
pub(crate) fn dedup_shards<R>(shards: Vec<ShardInfo<R>>) -> Vec<ShardInfo<R>> {
    let mut unique: Vec<ShardInfo<R>> = Vec::with_capacity(shards.len());
    for shard in shards {
        if !unique.contains(&shard) {
            unique.push(shard);
        }
    }
    unique
}

// ============================================================================
// Tests
// ============================================================================

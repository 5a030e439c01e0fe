//! Consistent-hash ring
//!
//! Every shard owns `160 * weight` virtual nodes on a `u64` ring. A key is
//! routed to the first virtual node at or after its hash, wrapping around to
//! the lowest virtual node past the top of the ring. Removing a shard only
//! moves the keys that its virtual nodes owned.
//!
//! A ring's state lives in an immutable `RingSnapshot`. Rebuilds construct a
//! complete new snapshot and publish it with one atomic swap, so lookups never
//! block and never mix virtual nodes from one membership with resources from
//! another.
//!
//! Rebuilds of one ring are serialized and read the registry while holding
//! the ring's rebuild lock, so a ring never publishes an older membership over
//! a newer one. Snapshots replaced by a rebuild are kept on a retired list
//! until their resources are shut down (see `drain_retired`).

use super::hashing::{HashAlgorithm, Hashing, SharedHasher};
use super::key_tag::KeyTagPattern;
use super::registry::{MembershipListener, ShardRegistry, SubscriberId};
use super::shard::{dedup_shards, ShardInfo};
use crate::error::ShardError;
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// Ring Configuration
// ============================================================================

/// Hashing and key tag settings shared by every ring a factory builds
#[derive(Clone)]
pub struct RingConfig {
    /// Hash function for keys and virtual nodes
    pub hasher: SharedHasher,
    /// Key tag pattern; `None` hashes whole keys
    pub key_tag: Option<KeyTagPattern>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            hasher: HashAlgorithm::default().shared(),
            key_tag: None,
        }
    }
}

impl RingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hasher(mut self, hasher: impl Hashing + 'static) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hasher = algorithm.shared();
        self
    }

    pub fn with_key_tag(mut self, pattern: KeyTagPattern) -> Self {
        self.key_tag = Some(pattern);
        self
    }

    /// Tag keys with the default `{...}` pattern
    pub fn with_default_key_tag(self) -> Self {
        self.with_key_tag(KeyTagPattern::default())
    }
}

impl fmt::Debug for RingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingConfig")
            .field("key_tag", &self.key_tag.as_ref().map(|p| p.as_str()))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Ring Snapshot
// ============================================================================

/// One immutable build of a ring
///
/// Virtual nodes and resources always come from the same shard list.
pub struct RingSnapshot<R> {
    /// Registry version this snapshot was built from (0 for static rings)
    version: u64,
    /// Virtual node hash -> index into `shards`
    vnodes: BTreeMap<u64, usize>,
    shards: Vec<ShardInfo<R>>,
    /// One resource per shard, parallel to `shards`
    resources: Vec<Arc<R>>,
}

impl<R> RingSnapshot<R> {
    fn empty() -> Self {
        Self {
            version: 0,
            vnodes: BTreeMap::new(),
            shards: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Place every shard's virtual nodes and create one resource per shard.
    /// On a hash collision the later virtual node wins.
    fn build(shards: &[ShardInfo<R>], hasher: &dyn Hashing, version: u64) -> Self {
        let mut vnodes = BTreeMap::new();
        let mut resources = Vec::with_capacity(shards.len());

        for (index, shard) in shards.iter().enumerate() {
            for n in 0..shard.vnode_count() {
                let position = hasher.hash(shard.vnode_key(index, n).as_bytes());
                vnodes.insert(position, index);
            }
            resources.push(Arc::new(shard.create_resource()));
        }

        Self {
            version,
            vnodes,
            shards: shards.to_vec(),
            resources,
        }
    }

    /// Index of the shard owning `hash`: the first virtual node at or after
    /// the hash, wrapping to the lowest one.
    fn locate(&self, hash: u64) -> Option<usize> {
        self.vnodes
            .range(hash..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, &index)| index)
    }

    pub fn shard_for_hash(&self, hash: u64) -> Option<&ShardInfo<R>> {
        self.locate(hash).map(|index| &self.shards[index])
    }

    pub fn resource_for_hash(&self, hash: u64) -> Option<&Arc<R>> {
        self.locate(hash).map(|index| &self.resources[index])
    }

    /// Resource bound to `shard` in this snapshot
    pub fn resource_of(&self, shard: &ShardInfo<R>) -> Option<&Arc<R>> {
        self.shards
            .iter()
            .position(|s| s == shard)
            .map(|index| &self.resources[index])
    }

    /// Virtual nodes in ring order
    pub fn vnodes(&self) -> impl Iterator<Item = (u64, &ShardInfo<R>)> + '_ {
        self.vnodes
            .iter()
            .map(move |(&position, &index)| (position, &self.shards[index]))
    }

    pub fn shards(&self) -> &[ShardInfo<R>] {
        &self.shards
    }

    pub fn resources(&self) -> &[Arc<R>] {
        &self.resources
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl<R> fmt::Debug for RingSnapshot<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingSnapshot")
            .field("version", &self.version)
            .field("shards", &self.shards)
            .field("vnodes", &self.vnodes.len())
            .finish()
    }
}

// ============================================================================
// Sharded Ring
// ============================================================================

enum Membership<R> {
    /// Built once from a fixed list
    Static,
    /// Rebuilt whenever the registry reports a change
    Registry(Arc<ShardRegistry<R>>),
}

/// Routes keys to shards and their resources
pub struct ShardedRing<R> {
    id: SubscriberId,
    state: ArcSwap<RingSnapshot<R>>,
    config: RingConfig,
    membership: Membership<R>,
    /// Held for a whole rebuild and by `detach`. Guards the retired snapshots.
    retired: Mutex<Vec<Arc<RingSnapshot<R>>>>,
    detached: AtomicBool,
}

impl<R: Send + Sync + 'static> ShardedRing<R> {
    /// Build an immutable ring from a fixed shard list
    ///
    /// Duplicate descriptors are collapsed, keeping the first.
    pub fn new(shards: Vec<ShardInfo<R>>, config: RingConfig) -> Result<Self, ShardError> {
        let shards = dedup_shards(shards);
        if shards.is_empty() {
            return Err(ShardError::EmptyShardList);
        }

        let snapshot = RingSnapshot::build(&shards, config.hasher.as_ref(), 0);
        let id = SubscriberId::next();
        tracing::debug!(
            ring = %id,
            shards = snapshot.shard_count(),
            vnodes = snapshot.vnode_count(),
            "Built static ring"
        );

        Ok(Self {
            id,
            state: ArcSwap::from_pointee(snapshot),
            config,
            membership: Membership::Static,
            retired: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        })
    }

    /// Build a ring that follows `registry`
    ///
    /// The ring subscribes before its first build, so no committed change can
    /// slip between the two.
    pub fn with_registry(registry: &Arc<ShardRegistry<R>>, config: RingConfig) -> Arc<Self> {
        let ring = Arc::new(Self {
            id: SubscriberId::next(),
            state: ArcSwap::from_pointee(RingSnapshot::empty()),
            config,
            membership: Membership::Registry(Arc::clone(registry)),
            retired: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        });

        registry.register(&ring);
        ring.rebuild_from(registry);
        ring
    }

    /// Rebuild from the registry's current list unless this ring already
    /// holds that version, or has been detached.
    ///
    /// Resource factories run under the ring's rebuild lock and must not
    /// mutate the registry this ring follows.
    fn rebuild_from(&self, registry: &ShardRegistry<R>) {
        let mut retired = self.lock_rebuild();
        if self.is_detached() {
            tracing::trace!(ring = %self.id, "Detached ring skips rebuild");
            return;
        }

        let (version, shards) = registry.versioned_shards();
        if version <= self.state.load().version {
            tracing::trace!(ring = %self.id, version, "Ring already up to date");
            return;
        }

        let fresh = RingSnapshot::build(&shards, self.config.hasher.as_ref(), version);
        tracing::debug!(
            ring = %self.id,
            version,
            shards = fresh.shard_count(),
            vnodes = fresh.vnode_count(),
            "Ring rebuilt"
        );

        let previous = self.state.swap(Arc::new(fresh));
        if !previous.resources.is_empty() {
            retired.push(previous);
        }
    }

    /// Pull the registry's current membership now
    pub fn refresh(&self) {
        if let Membership::Registry(registry) = &self.membership {
            self.rebuild_from(registry);
        }
    }
}

impl<R> ShardedRing<R> {
    fn lock_rebuild(&self) -> MutexGuard<'_, Vec<Arc<RingSnapshot<R>>>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shard owning a raw key
    pub fn shard_for_bytes(&self, key: &[u8]) -> Result<ShardInfo<R>, ShardError> {
        let snapshot = self.state.load();
        snapshot
            .shard_for_hash(self.config.hasher.hash(key))
            .cloned()
            .ok_or(ShardError::EmptyRing)
    }

    /// Resource of the shard owning a raw key
    pub fn resource_for_bytes(&self, key: &[u8]) -> Result<Arc<R>, ShardError> {
        let snapshot = self.state.load();
        snapshot
            .resource_for_hash(self.config.hasher.hash(key))
            .cloned()
            .ok_or(ShardError::EmptyRing)
    }

    /// Shard owning a key, after key tag extraction
    pub fn shard_for_key(&self, key: &str) -> Result<ShardInfo<R>, ShardError> {
        self.shard_for_bytes(self.key_tag(key).as_bytes())
    }

    /// Resource of the shard owning a key, after key tag extraction
    pub fn resource_for_key(&self, key: &str) -> Result<Arc<R>, ShardError> {
        self.resource_for_bytes(self.key_tag(key).as_bytes())
    }

    /// Shard and resource for a key, read from one snapshot
    pub fn route(&self, key: &str) -> Result<(ShardInfo<R>, Arc<R>), ShardError> {
        let snapshot = self.state.load();
        let hash = self.config.hasher.hash(self.key_tag(key).as_bytes());
        let index = snapshot.locate(hash).ok_or(ShardError::EmptyRing)?;
        Ok((
            snapshot.shards[index].clone(),
            Arc::clone(&snapshot.resources[index]),
        ))
    }

    /// The part of `key` that is hashed
    pub fn key_tag<'a>(&self, key: &'a str) -> &'a str {
        match &self.config.key_tag {
            Some(pattern) => pattern.extract(key),
            None => key,
        }
    }

    pub fn all_shards(&self) -> Vec<ShardInfo<R>> {
        self.state.load().shards.clone()
    }

    pub fn all_resources(&self) -> Vec<Arc<R>> {
        self.state.load().resources.clone()
    }

    /// The current snapshot; stays valid across later rebuilds
    pub fn snapshot(&self) -> Arc<RingSnapshot<R>> {
        self.state.load_full()
    }

    pub fn version(&self) -> u64 {
        self.state.load().version
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.membership, Membership::Registry(_))
    }

    pub fn registry(&self) -> Option<&Arc<ShardRegistry<R>>> {
        match &self.membership {
            Membership::Registry(registry) => Some(registry),
            Membership::Static => None,
        }
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Snapshots replaced by rebuilds whose resources have not been shut down
    ///
    /// Each call hands out a snapshot at most once. Their resources are no
    /// longer reachable through lookups, but a reader may still hold one.
    pub fn drain_retired(&self) -> Vec<Arc<RingSnapshot<R>>> {
        std::mem::take(&mut *self.lock_rebuild())
    }

    /// Number of snapshots waiting in `drain_retired`
    pub fn retired_count(&self) -> usize {
        self.lock_rebuild().len()
    }

    /// Stop following the registry. Waits for a rebuild in progress to
    /// publish; no snapshot is built or published afterwards. Idempotent; a
    /// no-op for static rings.
    pub fn detach(&self) {
        let already = {
            let _rebuild = self.lock_rebuild();
            self.detached.swap(true, Ordering::SeqCst)
        };
        if already {
            return;
        }
        if let Membership::Registry(registry) = &self.membership {
            registry.unregister_id(self.id);
            tracing::debug!(ring = %self.id, "Ring detached from registry");
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl<R: Send + Sync + 'static> MembershipListener<R> for ShardedRing<R> {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn on_membership_changed(&self, registry: &ShardRegistry<R>) {
        match &self.membership {
            Membership::Static => {
                tracing::warn!(ring = %self.id, "Static ring ignores membership changes");
            }
            Membership::Registry(_) if self.is_detached() => {
                tracing::trace!(ring = %self.id, "Detached ring ignores membership change");
            }
            Membership::Registry(own) if !std::ptr::eq(own.as_ref(), registry) => {
                tracing::warn!(ring = %self.id, "Ignoring change from a foreign registry");
            }
            Membership::Registry(_) => self.rebuild_from(registry),
        }
    }
}

impl<R> Drop for ShardedRing<R> {
    fn drop(&mut self) {
        if let Membership::Registry(registry) = &self.membership {
            registry.unregister_id(self.id);
        }
    }
}

impl<R> fmt::Debug for ShardedRing<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.state.load();
        f.debug_struct("ShardedRing")
            .field("id", &self.id)
            .field("dynamic", &self.is_dynamic())
            .field("version", &snapshot.version)
            .field("shards", &snapshot.shards)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

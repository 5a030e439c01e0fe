//! Shard registry
//!
//! The registry owns the authoritative shard list for a deployment and pushes
//! membership changes to every subscribed ring.
//!
//! Mutations mark the registry dirty and then notify. A notification pass
//! clears the dirty flag under the exclusive lock and dispatches after the
//! lock is released, so:
//! - mutations that commit before a pending pass runs are coalesced into it,
//!   and the trailing passes find the flag clear and do nothing;
//! - subscribers always rebuild against the list current at callback time;
//! - callbacks may call back into the registry, including mutating it.

use super::shard::{dedup_shards, ShardInfo};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

// ============================================================================
// Subscribers
// ============================================================================

/// Identity of a registry subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives membership change notifications from a `ShardRegistry`
pub trait MembershipListener<R>: Send + Sync {
    fn subscriber_id(&self) -> SubscriberId;

    /// Called after the registry committed one or more changes. Read the
    /// current membership from `registry`.
    fn on_membership_changed(&self, registry: &ShardRegistry<R>);
}

struct Subscriber<R> {
    id: SubscriberId,
    listener: Weak<dyn MembershipListener<R>>,
}

// ============================================================================
// Registry
// ============================================================================

struct RegistryState<R> {
    shards: Vec<ShardInfo<R>>,
    /// Bumped on every committed mutation
    version: u64,
    /// Committed changes not yet broadcast
    dirty: bool,
    subscribers: Vec<Subscriber<R>>,
}

/// Statistics about a shard registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub shards: usize,
    pub subscribers: usize,
    pub version: u64,
    /// Notification passes that dispatched to subscribers
    pub notifications: u64,
}

/// Authoritative, mutable shard membership
///
/// Membership checks are linear scans; shard counts are expected to stay in
/// the tens.
pub struct ShardRegistry<R> {
    state: RwLock<RegistryState<R>>,
    notifications: AtomicU64,
}

impl<R> Default for ShardRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ShardRegistry<R> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_shards(Vec::new())
    }

    /// Create a registry with an initial shard list
    pub fn with_shards(shards: Vec<ShardInfo<R>>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                shards: dedup_shards(shards),
                version: 1,
                dirty: false,
                subscribers: Vec::new(),
            }),
            notifications: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState<R>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState<R>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current shard list
    pub fn shards(&self) -> Vec<ShardInfo<R>> {
        self.read().shards.clone()
    }

    /// Snapshot of the current shard list with the version it belongs to
    pub fn versioned_shards(&self) -> (u64, Vec<ShardInfo<R>>) {
        let state = self.read();
        (state.version, state.shards.clone())
    }

    pub fn contains(&self, shard: &ShardInfo<R>) -> bool {
        self.read().shards.contains(shard)
    }

    pub fn len(&self) -> usize {
        self.read().shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().shards.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().subscribers.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.read();
        RegistryStats {
            shards: state.shards.len(),
            subscribers: state.subscribers.len(),
            version: state.version,
            notifications: self.notifications.load(Ordering::SeqCst),
        }
    }

    /// Replace the whole membership
    ///
    /// Does nothing when `shards` holds exactly the current shards, in any
    /// order. An empty list clears the registry.
    pub fn set_shards(&self, shards: Vec<ShardInfo<R>>) {
        if self.stage_set(shards) {
            self.notify_subscribers();
        }
    }

    /// Add a shard; does nothing if it is already present
    pub fn add_shard(&self, shard: ShardInfo<R>) {
        if self.stage_add(shard) {
            self.notify_subscribers();
        }
    }

    /// Remove a shard; does nothing if it is not present
    pub fn remove_shard(&self, shard: &ShardInfo<R>) {
        if self.stage_remove(shard) {
            self.notify_subscribers();
        }
    }

    /// Swap `old` for `new` at the same position
    ///
    /// Does nothing if `old` is absent or `new` is already present.
    pub fn replace_shard(&self, old: &ShardInfo<R>, new: ShardInfo<R>) {
        if self.stage_replace(old, new) {
            self.notify_subscribers();
        }
    }

    /// Start a group of mutations that notifies subscribers once, on commit
    pub fn batch(&self) -> MembershipBatch<'_, R> {
        MembershipBatch {
            registry: self,
            committed: false,
        }
    }

    fn stage_set(&self, shards: Vec<ShardInfo<R>>) -> bool {
        let shards = dedup_shards(shards);
        if self.same_members(&self.read().shards, &shards) {
            tracing::trace!(shards = shards.len(), "Shard list unchanged, skipping update");
            return false;
        }

        let mut state = self.write();
        if self.same_members(&state.shards, &shards) {
            return false;
        }
        state.shards = shards;
        Self::mark_changed(&mut state);
        tracing::debug!(
            shards = state.shards.len(),
            version = state.version,
            "Shard list replaced"
        );
        true
    }

    fn stage_add(&self, shard: ShardInfo<R>) -> bool {
        if self.read().shards.contains(&shard) {
            return false;
        }

        let mut state = self.write();
        if state.shards.contains(&shard) {
            return false;
        }
        tracing::debug!(shard = %shard.label(), weight = shard.weight(), "Adding shard");
        state.shards.push(shard);
        Self::mark_changed(&mut state);
        true
    }

    fn stage_remove(&self, shard: &ShardInfo<R>) -> bool {
        if !self.read().shards.contains(shard) {
            return false;
        }

        let mut state = self.write();
        let Some(pos) = state.shards.iter().position(|s| s == shard) else {
            return false;
        };
        state.shards.remove(pos);
        Self::mark_changed(&mut state);
        tracing::debug!(shard = %shard.label(), "Removed shard");
        true
    }

    fn stage_replace(&self, old: &ShardInfo<R>, new: ShardInfo<R>) -> bool {
        let mut state = self.write();
        if state.shards.contains(&new) {
            return false;
        }
        let Some(pos) = state.shards.iter().position(|s| s == old) else {
            return false;
        };
        tracing::debug!(old = %old.label(), new = %new.label(), "Replacing shard");
        state.shards[pos] = new;
        Self::mark_changed(&mut state);
        true
    }

    fn same_members(&self, current: &[ShardInfo<R>], proposed: &[ShardInfo<R>]) -> bool {
        current.len() == proposed.len() && proposed.iter().all(|s| current.contains(s))
    }

    fn mark_changed(state: &mut RegistryState<R>) {
        state.version += 1;
        state.dirty = true;
    }

    /// Subscribe a listener. Registering the same subscriber twice has no
    /// further effect.
    ///
    /// The registry keeps only a weak reference; dropped listeners are pruned
    /// on the next notification.
    pub fn register<L>(&self, listener: &Arc<L>)
    where
        L: MembershipListener<R> + 'static,
    {
        let id = listener.subscriber_id();
        let listener: Arc<dyn MembershipListener<R>> = listener.clone();

        let mut state = self.write();
        if state.subscribers.iter().any(|s| s.id == id) {
            return;
        }
        state.subscribers.push(Subscriber {
            id,
            listener: Arc::downgrade(&listener),
        });
        tracing::debug!(subscriber = %id, "Registered membership subscriber");
    }

    pub fn unregister<L>(&self, listener: &L)
    where
        L: MembershipListener<R> + ?Sized,
    {
        self.unregister_id(listener.subscriber_id());
    }

    pub fn unregister_id(&self, id: SubscriberId) {
        let mut state = self.write();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != id);
        if state.subscribers.len() != before {
            tracing::debug!(subscriber = %id, "Unregistered membership subscriber");
        }
    }

    pub fn unregister_all(&self) {
        self.write().subscribers.clear();
    }

    /// Broadcast committed changes to subscribers
    ///
    /// Returns immediately when nothing changed since the last pass.
    /// Subscribers are called newest first.
    pub fn notify_subscribers(&self) {
        let (version, pending) = {
            let mut state = self.write();
            if !state.dirty {
                return;
            }
            state.dirty = false;
            state.subscribers.retain(|s| s.listener.strong_count() > 0);
            let pending: Vec<Weak<dyn MembershipListener<R>>> = state
                .subscribers
                .iter()
                .rev()
                .map(|s| s.listener.clone())
                .collect();
            (state.version, pending)
        };

        self.notifications.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            version,
            subscribers = pending.len(),
            "Notifying subscribers of membership change"
        );

        for listener in pending {
            if let Some(listener) = listener.upgrade() {
                listener.on_membership_changed(self);
            }
        }
    }
}

impl<R> fmt::Debug for ShardRegistry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("ShardRegistry")
            .field("shards", &state.shards)
            .field("version", &state.version)
            .field("dirty", &state.dirty)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

// ============================================================================
// Batched Mutations
// ============================================================================

/// A group of registry mutations broadcast as a single notification
///
/// Each mutation commits immediately (readers of the registry see it), but
/// subscribers are only notified by `commit`, or when the batch is dropped.
pub struct MembershipBatch<'a, R> {
    registry: &'a ShardRegistry<R>,
    committed: bool,
}

impl<R> MembershipBatch<'_, R> {
    pub fn set_shards(&mut self, shards: Vec<ShardInfo<R>>) -> &mut Self {
        self.registry.stage_set(shards);
        self
    }

    pub fn add_shard(&mut self, shard: ShardInfo<R>) -> &mut Self {
        self.registry.stage_add(shard);
        self
    }

    pub fn remove_shard(&mut self, shard: &ShardInfo<R>) -> &mut Self {
        self.registry.stage_remove(shard);
        self
    }

    pub fn replace_shard(&mut self, old: &ShardInfo<R>, new: ShardInfo<R>) -> &mut Self {
        self.registry.stage_replace(old, new);
        self
    }

    /// Notify subscribers of everything staged so far
    pub fn commit(mut self) {
        self.committed = true;
        self.registry.notify_subscribers();
    }
}

impl<R> Drop for MembershipBatch<'_, R> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.notify_subscribers();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

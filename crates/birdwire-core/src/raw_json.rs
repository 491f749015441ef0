//! Raw-JSON provenance registry.
//!
//! A [`RawJsonScope`] maps constructed objects, by identity, to the JSON text they
//! were decoded from. Each unit-of-work (one request, one stream line) gets its
//! own scope, so concurrent decodes never observe each other's entries and the
//! owner can drop everything at once when the work is done.
//!
//! Objects are tracked through `Arc`s: the key is the allocation, not the value,
//! so two equal messages decoded from different payloads keep separate entries.
//! Only decoders inside this crate may register; everyone else can look up and
//! clear.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    ops::Deref,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak,
    },
};

use crate::domain::ScopeId;

/// Entry count at which a scope first sweeps out entries for dropped objects.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 1024;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_scope_id() -> ScopeId {
    ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
}

type Key = (TypeId, usize);

fn key_of<T: Any>(object: &Arc<T>) -> Key {
    (TypeId::of::<T>(), Arc::as_ptr(object) as *const () as usize)
}

struct Entry {
    // Holding the weak ref pins the allocation, so the address in the key
    // cannot be handed to another object while the entry exists.
    object: Weak<dyn Any + Send + Sync>,
    raw: String,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.object.strong_count() > 0
    }
}

struct ScopeState {
    entries: HashMap<Key, Entry>,
    prune_at: usize,
    closed: bool,
}

/// Raw JSON store for a single unit-of-work.
///
/// Mutations are serialized by an internal mutex, so a scope can be shared
/// across threads behind an `Arc` when one unit-of-work fans out.
pub struct RawJsonScope {
    id: ScopeId,
    prune_threshold: usize,
    state: Mutex<ScopeState>,
}

impl RawJsonScope {
    pub fn new() -> Self {
        Self::with_prune_threshold(DEFAULT_PRUNE_THRESHOLD)
    }

    pub fn with_prune_threshold(prune_threshold: usize) -> Self {
        let prune_threshold = prune_threshold.max(1);
        Self {
            id: next_scope_id(),
            prune_threshold,
            state: Mutex::new(ScopeState {
                entries: HashMap::new(),
                prune_at: prune_threshold,
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        // Entries are plain data; a panic mid-update cannot leave them torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Associate `raw` with `object` and hand the object back.
    ///
    /// Registering the same object again replaces the previous text.
    pub(crate) fn register<T>(&self, object: Arc<T>, raw: impl Into<String>) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        let key = key_of(&object);
        let weak: Weak<T> = Arc::downgrade(&object);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        let mut state = self.state();
        if state.closed {
            tracing::trace!(scope = %self.id, "ignored registration on closed scope");
            return object;
        }
        state.entries.insert(
            key,
            Entry {
                object: weak,
                raw: raw.into(),
            },
        );

        if state.entries.len() >= state.prune_at {
            let before = state.entries.len();
            state.entries.retain(|_, e| e.is_live());
            let after = state.entries.len();
            // Back off when most entries are still live to keep inserts amortized O(1).
            state.prune_at = (after * 2).max(self.prune_threshold);
            tracing::trace!(scope = %self.id, removed = before - after, "pruned raw json entries");
        }
        drop(state);

        tracing::trace!(scope = %self.id, "registered raw json");
        object
    }

    /// Raw JSON recorded for `object` in this scope, if any.
    pub fn raw_json<T>(&self, object: &Arc<T>) -> Option<String>
    where
        T: Any + Send + Sync,
    {
        let state = self.state();
        if state.closed {
            return None;
        }
        state
            .entries
            .get(&key_of(object))
            .filter(|e| e.is_live())
            .map(|e| e.raw.clone())
    }

    pub fn contains<T>(&self, object: &Arc<T>) -> bool
    where
        T: Any + Send + Sync,
    {
        let state = self.state();
        state
            .entries
            .get(&key_of(object))
            .is_some_and(Entry::is_live)
    }

    /// Remove every entry in this scope. Safe to call on an empty scope.
    pub fn clear(&self) {
        let mut state = self.state();
        if state.entries.is_empty() {
            return;
        }
        let removed = state.entries.len();
        state.entries.clear();
        state.entries.shrink_to_fit();
        state.prune_at = self.prune_threshold;
        tracing::trace!(scope = %self.id, removed, "cleared raw json scope");
    }

    /// Clear the scope and stop accepting registrations. Lookups on a closed
    /// scope always miss, even through handles that outlive the owner.
    pub(crate) fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.entries = HashMap::new();
        state.prune_at = self.prune_threshold;
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Drop entries whose objects no longer exist. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|_, e| e.is_live());
        before - state.entries.len()
    }

    /// Number of stored entries, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }
}

impl Default for RawJsonScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawJsonScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawJsonScope")
            .field("id", &self.id)
            .field("entries", &self.len())
            .finish()
    }
}

/// Process-wide owner of the open raw JSON scopes.
///
/// Scopes are opened per unit-of-work and closed by dropping the returned
/// [`ScopeGuard`], which clears the scope.
pub struct RawJsonRegistry {
    prune_threshold: usize,
    scopes: Mutex<HashMap<ScopeId, Arc<RawJsonScope>>>,
}

impl RawJsonRegistry {
    pub fn new() -> Self {
        Self::with_prune_threshold(DEFAULT_PRUNE_THRESHOLD)
    }

    pub fn with_prune_threshold(prune_threshold: usize) -> Self {
        Self {
            prune_threshold,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// The shared registry for this process.
    pub fn global() -> &'static RawJsonRegistry {
        static GLOBAL: OnceLock<RawJsonRegistry> = OnceLock::new();
        GLOBAL.get_or_init(RawJsonRegistry::new)
    }

    fn scopes(&self) -> MutexGuard<'_, HashMap<ScopeId, Arc<RawJsonScope>>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a fresh scope for one unit-of-work.
    pub fn open_scope(&self) -> ScopeGuard<'_> {
        let scope = Arc::new(RawJsonScope::with_prune_threshold(self.prune_threshold));
        self.scopes().insert(scope.id(), Arc::clone(&scope));
        tracing::trace!(scope = %scope.id(), "opened raw json scope");
        ScopeGuard {
            registry: self,
            scope,
        }
    }

    /// Look up an open scope by id.
    pub fn scope(&self, id: ScopeId) -> Option<Arc<RawJsonScope>> {
        self.scopes().get(&id).cloned()
    }

    pub fn live_scopes(&self) -> usize {
        self.scopes().len()
    }

    fn detach(&self, id: ScopeId) {
        self.scopes().remove(&id);
        tracing::trace!(scope = %id, "closed raw json scope");
    }
}

impl Default for RawJsonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// An open scope. Dropping it closes the scope and detaches it from the registry;
/// handles from [`ScopeGuard::shared`] stay valid but record nothing afterwards.
pub struct ScopeGuard<'r> {
    registry: &'r RawJsonRegistry,
    scope: Arc<RawJsonScope>,
}

impl ScopeGuard<'_> {
    /// A handle that can be moved to other threads working on the same unit-of-work.
    pub fn shared(&self) -> Arc<RawJsonScope> {
        Arc::clone(&self.scope)
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = RawJsonScope;

    fn deref(&self) -> &RawJsonScope {
        &self.scope
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.close();
        self.registry.detach(self.scope.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, PartialEq, Eq)]
    struct Payload(u32);

    #[test]
    fn register_then_lookup_in_same_scope() {
        let scope = RawJsonScope::new();
        let obj = scope.register(Arc::new(Payload(1)), r#"{"v":1}"#);
        assert_eq!(scope.raw_json(&obj).as_deref(), Some(r#"{"v":1}"#));
        assert!(scope.contains(&obj));
    }

    #[test]
    fn register_returns_the_same_object() {
        let scope = RawJsonScope::new();
        let obj = Arc::new(Payload(7));
        let back = scope.register(Arc::clone(&obj), "{}");
        assert!(Arc::ptr_eq(&obj, &back));
    }

    #[test]
    fn unregistered_object_is_absent() {
        let scope = RawJsonScope::new();
        assert_eq!(scope.raw_json(&Arc::new(Payload(1))), None);
    }

    #[test]
    fn reregistering_overwrites() {
        let scope = RawJsonScope::new();
        let obj = scope.register(Arc::new(Payload(1)), "first");
        let obj = scope.register(obj, "second");
        assert_eq!(scope.raw_json(&obj).as_deref(), Some("second"));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn keys_by_identity_not_value() {
        let scope = RawJsonScope::new();
        let a = scope.register(Arc::new(Payload(1)), "a");
        let b = scope.register(Arc::new(Payload(1)), "b");
        assert_eq!(a, b);
        assert_eq!(scope.raw_json(&a).as_deref(), Some("a"));
        assert_eq!(scope.raw_json(&b).as_deref(), Some("b"));
    }

    #[test]
    fn clear_removes_everything_and_is_idempotent() {
        let scope = RawJsonScope::new();
        let a = scope.register(Arc::new(Payload(1)), "a");
        let b = scope.register(Arc::new(Payload(2)), "b");
        scope.clear();
        assert_eq!(scope.raw_json(&a), None);
        assert_eq!(scope.raw_json(&b), None);
        assert!(scope.is_empty());
        scope.clear();
        assert!(scope.is_empty());
    }

    #[test]
    fn dropped_objects_are_not_found_and_get_pruned() {
        let scope = RawJsonScope::new();
        let kept = scope.register(Arc::new(Payload(1)), "kept");
        let gone = scope.register(Arc::new(Payload(2)), "gone");
        drop(gone);

        assert_eq!(scope.len(), 2);
        assert_eq!(scope.prune(), 1);
        assert_eq!(scope.len(), 1);
        assert_eq!(scope.raw_json(&kept).as_deref(), Some("kept"));
    }

    #[test]
    fn register_prunes_dead_entries_past_threshold() {
        let scope = RawJsonScope::with_prune_threshold(4);
        for i in 0..100 {
            let _ = scope.register(Arc::new(Payload(i)), "x");
        }
        assert!(scope.len() <= 4);
    }

    #[test]
    fn scopes_do_not_share_entries() {
        let a = RawJsonScope::new();
        let b = RawJsonScope::new();
        assert_ne!(a.id(), b.id());

        let obj = a.register(Arc::new(Payload(1)), "only in a");
        assert_eq!(b.raw_json(&obj), None);
        b.clear();
        assert_eq!(a.raw_json(&obj).as_deref(), Some("only in a"));
    }

    #[test]
    fn concurrent_scopes_stay_isolated() {
        let registry = Arc::new(RawJsonRegistry::new());
        let handles: Vec<_> = (0..8u32)
            .map(|n| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let scope = registry.open_scope();
                    let mine: Vec<_> = (0..50)
                        .map(|i| scope.register(Arc::new(Payload(i)), format!("{n}:{i}")))
                        .collect();
                    for (i, obj) in mine.iter().enumerate() {
                        assert_eq!(scope.raw_json(obj), Some(format!("{n}:{i}")));
                    }
                    (scope.id(), mine)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // All guards are gone: nothing is reachable any more.
        assert_eq!(registry.live_scopes(), 0);
        for (id, _) in &results {
            assert!(registry.scope(*id).is_none());
        }
    }

    #[test]
    fn shared_scope_serializes_writers() {
        let scope = Arc::new(RawJsonScope::new());
        let handles: Vec<_> = (0..4u32)
            .map(|n| {
                let scope = Arc::clone(&scope);
                thread::spawn(move || {
                    (0..25)
                        .map(|i| scope.register(Arc::new(Payload(n * 100 + i)), format!("{n}-{i}")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let objects: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(scope.len(), 100);
        for obj in &objects {
            let raw = scope.raw_json(obj).unwrap();
            let n = obj.0 / 100;
            let i = obj.0 % 100;
            assert_eq!(raw, format!("{n}-{i}"));
        }
    }

    #[test]
    fn guard_drop_clears_and_detaches() {
        let registry = RawJsonRegistry::new();
        let obj;
        let shared;
        let id;
        {
            let scope = registry.open_scope();
            id = scope.id();
            obj = scope.register(Arc::new(Payload(3)), "three");
            shared = scope.shared();
            assert_eq!(registry.live_scopes(), 1);
            assert!(registry.scope(id).is_some());
        }
        assert_eq!(registry.live_scopes(), 0);
        assert!(registry.scope(id).is_none());
        assert_eq!(shared.raw_json(&obj), None);
    }

    #[test]
    fn shared_handle_records_nothing_after_guard_drop() {
        let registry = RawJsonRegistry::new();
        let shared = {
            let scope = registry.open_scope();
            assert!(!scope.is_closed());
            scope.shared()
        };
        assert!(shared.is_closed());
        assert_eq!(registry.live_scopes(), 0);

        let obj = shared.register(Arc::new(Payload(4)), "late");
        assert_eq!(shared.raw_json(&obj), None);
        assert!(!shared.contains(&obj));
        assert!(shared.is_empty());
    }

    #[test]
    fn global_registry_is_shared() {
        let a = RawJsonRegistry::global() as *const RawJsonRegistry;
        let b = RawJsonRegistry::global() as *const RawJsonRegistry;
        assert_eq!(a, b);

        let scope = RawJsonRegistry::global().open_scope();
        let found = RawJsonRegistry::global().scope(scope.id());
        assert!(found.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scope_ids_are_unique_across_tasks() {
        let tasks: Vec<_> = (0..16)
            .map(|_| tokio::spawn(async { RawJsonScope::new().id() }))
            .collect();
        let mut ids = Vec::new();
        for t in tasks {
            ids.push(t.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
    }
}

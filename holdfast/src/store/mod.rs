//! Stores: the root container and the scopes derived from it
//!
//! A [`Store`] is a cheap handle over a core. The root core owns the state
//! and runs the dispatch loop; scoped cores project the state of their
//! parent and rewrite actions on their way up. Each store caches the
//! scopes derived from it, keyed by [`ScopeId`], so deriving the same scope
//! twice yields the same store.

mod root;
mod scoped;

use crate::config::StoreConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::effect::Throttles;
use crate::reducer::Reducer;
use crate::registry::EffectRegistry;
use crate::task::StoreTask;
use crate::types::{CancelId, ScopeId};
use parking_lot::Mutex;
use root::RootCore;
use scoped::{ClosureCore, IfLetCore, ScopedCore};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

/// State shared by a root core and every scope derived from it
pub(crate) struct Shared {
    pub(crate) config: StoreConfig,
    pub(crate) registry: Arc<EffectRegistry>,
    pub(crate) diagnostics: Arc<Diagnostics>,
    pub(crate) changes: broadcast::Sender<u64>,
    pub(crate) version: AtomicU64,
    pub(crate) throttles: Arc<Throttles>,
}

/// Object-safe interface shared by root and scoped cores
pub(crate) trait Core<S, A>: Send + Sync {
    /// Call `f` exactly once with the current state
    fn read(&self, f: &mut dyn FnMut(&S));

    fn send(&self, action: A) -> StoreTask;

    fn is_invalid(&self) -> bool;

    fn can_cache_children(&self) -> bool;

    fn shared(&self) -> &Arc<Shared>;
}

/// Cached child scope with its concrete types erased
trait CachedScope: Send + Sync {
    fn is_invalid(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<S, A> CachedScope for Store<S, A>
where
    S: Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
{
    fn is_invalid(&self) -> bool {
        Store::is_invalid(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Size at which the child cache is first swept for invalid scopes
const SWEEP_FLOOR: usize = 16;

struct StoreNode<S, A> {
    core: Arc<dyn Core<S, A>>,
    path: String,
    children: Mutex<HashMap<ScopeId, Arc<dyn CachedScope>>>,
    /// Cache size that triggers the next sweep on insert
    sweep_at: AtomicUsize,
}

/// Handle to a root store or a scope of one
///
/// Clones share the same underlying store; use [`Store::ptr_eq`] to test
/// identity.
pub struct Store<S, A> {
    inner: Arc<StoreNode<S, A>>,
}

impl<S, A> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A> Store<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
{
    /// Create a root store with the default configuration
    ///
    /// Asynchronous effects run on the tokio runtime current at this call,
    /// if any.
    pub fn new(initial: S, reducer: impl Reducer<S, A>) -> Self {
        Self::builder(initial, reducer).build()
    }

    pub fn builder(initial: S, reducer: impl Reducer<S, A>) -> StoreBuilder<S, A> {
        StoreBuilder {
            initial,
            reducer: Box::new(reducer),
            config: StoreConfig::default(),
            runtime: None,
        }
    }

    /// Copy of the current state
    pub fn state(&self) -> S {
        self.with_state(S::clone)
    }
}

impl<S, A> Store<S, A>
where
    S: Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
{
    fn from_core(core: Arc<dyn Core<S, A>>, path: String) -> Self {
        Self {
            inner: Arc::new(StoreNode {
                core,
                path,
                children: Mutex::new(HashMap::new()),
                sweep_at: AtomicUsize::new(SWEEP_FLOOR),
            }),
        }
    }

    fn shared(&self) -> &Arc<Shared> {
        self.inner.core.shared()
    }

    /// Send an action through this store to the root reducer
    ///
    /// Sending to an invalidated scope does nothing, records a
    /// [`Diagnostic::SendToInvalidScope`], and returns a finished task.
    pub fn send(&self, action: A) -> StoreTask {
        if self.inner.core.is_invalid() {
            self.shared().diagnostics.report(Diagnostic::SendToInvalidScope {
                scope: self.inner.path.clone(),
                action: format!("{action:?}"),
            });
            return StoreTask::finished();
        }
        self.inner.core.send(action)
    }

    /// Borrow the most recently committed state
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let mut f = Some(f);
        let mut result = None;
        self.inner.core.read(&mut |state: &S| {
            if let Some(f) = f.take() {
                result = Some(f(state));
            }
        });
        match result {
            Some(result) => result,
            None => unreachable!("store cores always yield their state"),
        }
    }

    /// Whether this store's projected state has disappeared
    pub fn is_invalid(&self) -> bool {
        self.inner.core.is_invalid()
    }

    /// Number of commits so far
    pub fn version(&self) -> u64 {
        self.shared().version.load(Ordering::Acquire)
    }

    /// Subscribe to commit notifications
    ///
    /// One message carrying the new version is broadcast per commit, no
    /// matter how many actions the commit applied.
    pub fn changes(&self) -> broadcast::Receiver<u64> {
        self.shared().changes.subscribe()
    }

    /// Number of live effect instances in the whole store tree
    pub fn effect_count(&self) -> usize {
        self.shared().registry.len()
    }

    /// Cancel every effect registered under `id`, returning how many
    pub fn cancel_effects<K>(&self, id: K) -> usize
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        self.shared().registry.cancel_by_key(&CancelId::new(id))
    }

    pub fn cancel_all_effects(&self) {
        self.shared().registry.cancel_all();
    }

    /// Diagnostics recorded so far, oldest first
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.shared().diagnostics.snapshot()
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.shared().diagnostics.take()
    }

    /// Whether both handles refer to the same store
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of valid scopes currently cached by this store
    ///
    /// Invalid scopes are evicted first.
    pub fn cached_children(&self) -> usize {
        self.evict_invalid_children();
        self.inner.children.lock().len()
    }

    /// Path of this store from the root, for logs
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Derive a scope over state that always exists
    pub fn scope<C, CA, P, I>(&self, id: ScopeId, project: P, inject: I) -> Store<C, CA>
    where
        C: Send + Sync + 'static,
        CA: fmt::Debug + Send + 'static,
        P: for<'a> Fn(&'a S) -> &'a C + Send + Sync + 'static,
        I: Fn(CA) -> A + Send + Sync + 'static,
    {
        let parent_invalid = self.is_invalid();
        if parent_invalid {
            self.report_invalid_parent(&id);
        }
        let cacheable = !parent_invalid && self.inner.core.can_cache_children();
        if cacheable {
            if let Some(child) = self.cached_child(&id) {
                return child;
            }
        }

        let core = ScopedCore::new(
            Arc::clone(&self.inner.core),
            Box::new(project),
            Box::new(inject),
        );
        let child = self.child(&id, Arc::new(core));
        if cacheable {
            return self.cache_child(id, child);
        }
        child
    }

    /// Derive a scope over state that may disappear
    ///
    /// Returns `None` if the projection is absent right now. The returned
    /// store becomes invalid once the projection is found absent.
    pub fn scope_if_let<C, CA, P, I>(&self, id: ScopeId, project: P, inject: I) -> Option<Store<C, CA>>
    where
        C: Clone + Send + Sync + 'static,
        CA: fmt::Debug + Send + 'static,
        P: for<'a> Fn(&'a S) -> Option<&'a C> + Send + Sync + 'static,
        I: Fn(CA) -> A + Send + Sync + 'static,
    {
        if self.is_invalid() {
            self.report_invalid_parent(&id);
            return None;
        }
        let cacheable = self.inner.core.can_cache_children();
        if cacheable {
            if let Some(child) = self.cached_child(&id) {
                return Some(child);
            }
        } else {
            self.shared().diagnostics.report(Diagnostic::UncachedScope {
                scope: id.clone(),
                parent: self.inner.path.clone(),
            });
        }

        let Some(core) = IfLetCore::new(
            Arc::clone(&self.inner.core),
            Box::new(project),
            Box::new(inject),
            id.clone(),
        ) else {
            self.shared()
                .diagnostics
                .report(Diagnostic::MissingProjection { scope: id });
            return None;
        };
        let child = self.child(&id, Arc::new(core));
        if cacheable {
            return Some(self.cache_child(id, child));
        }
        Some(child)
    }

    /// Derive one scope per key of a keyed collection
    ///
    /// Each element gets the scope id `id.keyed(key)`. Keys whose element
    /// is absent are skipped.
    pub fn scope_each<K, C, CA, P, I>(
        &self,
        id: ScopeId,
        keys: impl IntoIterator<Item = K>,
        project: P,
        inject: I,
    ) -> Vec<Store<C, CA>>
    where
        K: Clone + Hash + Eq + fmt::Debug + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        CA: fmt::Debug + Send + 'static,
        P: for<'a> Fn(&'a S, &K) -> Option<&'a C> + Send + Sync + 'static,
        I: Fn(K, CA) -> A + Send + Sync + 'static,
    {
        let project = Arc::new(project);
        let inject = Arc::new(inject);
        keys.into_iter()
            .filter_map(|key| {
                let project = Arc::clone(&project);
                let inject = Arc::clone(&inject);
                let element = key.clone();
                self.scope_if_let(
                    id.clone().keyed(key.clone()),
                    move |state| (*project)(state, &element),
                    move |action| (*inject)(key.clone(), action),
                )
            })
            .collect()
    }

    /// Derive a scope from an owned projection
    ///
    /// The result is never cached and caches none of its own scopes.
    pub fn scope_uncached<C, CA, P, I>(&self, project: P, inject: I) -> Store<C, CA>
    where
        C: Send + Sync + 'static,
        CA: fmt::Debug + Send + 'static,
        P: Fn(&S) -> C + Send + Sync + 'static,
        I: Fn(CA) -> A + Send + Sync + 'static,
    {
        let core = ClosureCore::new(
            Arc::clone(&self.inner.core),
            Box::new(project),
            Box::new(inject),
        );
        Store::from_core(Arc::new(core), format!("{}/~", self.inner.path))
    }

    fn child<C, CA>(&self, id: &ScopeId, core: Arc<dyn Core<C, CA>>) -> Store<C, CA>
    where
        C: Send + Sync + 'static,
        CA: fmt::Debug + Send + 'static,
    {
        tracing::debug!(parent = %self.inner.path, scope = %id, "scope derived");
        Store::from_core(core, format!("{}/{}", self.inner.path, id))
    }

    /// Valid cached scope for `id`, evicting an invalid or mistyped entry
    fn cached_child<C, CA>(&self, id: &ScopeId) -> Option<Store<C, CA>>
    where
        C: Send + Sync + 'static,
        CA: fmt::Debug + Send + 'static,
    {
        let cached = {
            let children = self.inner.children.lock();
            let entry = children.get(id)?;
            let child = entry.as_any().downcast_ref::<Store<C, CA>>().cloned();
            if child.is_none() {
                tracing::warn!(scope = %id, "scope id reused with different types; replacing");
            }
            child
        };
        // Checked outside the lock: validity reads the parent's state
        match cached {
            Some(child) if !child.is_invalid() => Some(child),
            _ => {
                let evicted = self.inner.children.lock().remove(id);
                drop(evicted);
                None
            }
        }
    }

    /// Cache `child` under `id`
    ///
    /// If another thread cached the same scope first, that store is
    /// returned instead and `child` is discarded.
    fn cache_child<C, CA>(&self, id: ScopeId, child: Store<C, CA>) -> Store<C, CA>
    where
        C: Send + Sync + 'static,
        CA: fmt::Debug + Send + 'static,
    {
        if self.inner.children.lock().len() >= self.inner.sweep_at.load(Ordering::Relaxed) {
            let live = self.evict_invalid_children();
            self.inner
                .sweep_at
                .store((live * 2).max(SWEEP_FLOOR), Ordering::Relaxed);
        }

        let mut children = self.inner.children.lock();
        let existing = children
            .get(&id)
            .and_then(|entry| entry.as_any().downcast_ref::<Store<C, CA>>())
            .cloned();
        if let Some(existing) = existing {
            return existing;
        }
        children.insert(id, Arc::new(child.clone()));
        child
    }

    /// Drop every cached scope that has become invalid, returning how many remain
    fn evict_invalid_children(&self) -> usize {
        let cached: Vec<(ScopeId, Arc<dyn CachedScope>)> = self
            .inner
            .children
            .lock()
            .iter()
            .map(|(id, child)| (id.clone(), Arc::clone(child)))
            .collect();
        // Checked outside the lock, as in `cached_child`
        let stale: Vec<_> = cached
            .into_iter()
            .filter(|(_, child)| child.is_invalid())
            .collect();

        let mut children = self.inner.children.lock();
        for (id, child) in &stale {
            if children.get(id).is_some_and(|entry| Arc::ptr_eq(entry, child)) {
                children.remove(id);
            }
        }
        if !stale.is_empty() {
            tracing::debug!(parent = %self.inner.path, evicted = stale.len(), "evicted invalid scopes");
        }
        children.len()
    }

    fn report_invalid_parent(&self, id: &ScopeId) {
        self.shared()
            .diagnostics
            .report(Diagnostic::ScopeOfInvalidStore {
                scope: id.clone(),
                parent: self.inner.path.clone(),
            });
    }
}

impl<S, A> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("invalid", &self.inner.core.is_invalid())
            .finish()
    }
}

/// Configures and builds a root [`Store`]
pub struct StoreBuilder<S, A> {
    initial: S,
    reducer: Box<dyn Reducer<S, A>>,
    config: StoreConfig,
    runtime: Option<Handle>,
}

impl<S, A> StoreBuilder<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
{
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Name used in log records
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Runtime that asynchronous effects are spawned on
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Store<S, A> {
        let config = self.config.normalized();
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        if runtime.is_none() {
            tracing::debug!(store = %config.name, "no tokio runtime; asynchronous effects will be dropped");
        }
        let path = config.name.clone();
        let core = RootCore::new(self.initial, self.reducer, config, runtime);
        Store::from_core(core, path)
    }
}

//! Registry of live effect instances
//!
//! Every effect instance a store launches is registered here under its
//! [`EffectId`] and under each [`CancelId`] it was made cancellable with.
//! The registry is shared between the dispatch loop and the tasks running
//! effect bodies, so all access goes through a single short-lived lock.

use crate::task::TaskGroup;
use crate::types::{CancelId, EffectId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What kind of work an instance runs, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Stream,
    Task,
}

struct LiveEffect {
    kind: EffectKind,
    token: CancellationToken,
    cancel_ids: Vec<CancelId>,
}

#[derive(Default)]
struct RegistryState {
    live: HashMap<EffectId, LiveEffect>,
    by_cancel_id: HashMap<CancelId, HashSet<EffectId>>,
}

/// Concurrent map of live effect instances
#[derive(Default)]
pub struct EffectRegistry {
    state: Mutex<RegistryState>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live instance
    pub fn register(
        &self,
        id: EffectId,
        kind: EffectKind,
        token: CancellationToken,
        cancel_ids: &[CancelId],
    ) {
        let mut state = self.state.lock();
        for key in cancel_ids {
            state.by_cancel_id.entry(key.clone()).or_default().insert(id);
        }
        state.live.insert(
            id,
            LiveEffect {
                kind,
                token,
                cancel_ids: cancel_ids.to_vec(),
            },
        );
    }

    /// Request cancellation of one instance
    ///
    /// Returns whether the instance was live. Unknown or finished ids are
    /// ignored. The entry itself is removed by the instance once it
    /// observes the cancellation.
    pub fn cancel(&self, id: &EffectId) -> bool {
        let token = self.state.lock().live.get(id).map(|e| e.token.clone());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every instance registered under `key`, returning how many
    pub fn cancel_by_key(&self, key: &CancelId) -> usize {
        let tokens: Vec<CancellationToken> = {
            let state = self.state.lock();
            state
                .by_cancel_id
                .get(key)
                .into_iter()
                .flatten()
                .filter_map(|id| state.live.get(id))
                .map(|e| e.token.clone())
                .collect()
        };
        // Tokens are cancelled outside the lock
        for token in &tokens {
            token.cancel();
        }
        if !tokens.is_empty() {
            tracing::debug!(key = ?key, count = tokens.len(), "cancelled effects by key");
        }
        tokens.len()
    }

    /// Cancel every live instance
    pub fn cancel_all(&self) {
        let tokens: Vec<CancellationToken> = self
            .state
            .lock()
            .live
            .values()
            .map(|e| e.token.clone())
            .collect();
        for token in tokens {
            token.cancel();
        }
    }

    /// Remove an instance's entry
    ///
    /// Returns false if the id was not registered.
    pub fn remove(&self, id: &EffectId) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.live.remove(id) else {
            return false;
        };
        for key in &entry.cancel_ids {
            if let Some(ids) = state.by_cancel_id.get_mut(key) {
                ids.remove(id);
                if ids.is_empty() {
                    state.by_cancel_id.remove(key);
                }
            }
        }
        tracing::trace!(effect = %id, kind = ?entry.kind, "effect removed");
        true
    }

    pub fn contains(&self, id: &EffectId) -> bool {
        self.state.lock().live.contains_key(id)
    }

    /// Number of live instances
    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live instances registered under `key`
    pub fn count_for(&self, key: &CancelId) -> usize {
        self.state.lock().by_cancel_id.get(key).map_or(0, HashSet::len)
    }

    /// Ids of all live instances
    pub fn ids(&self) -> Vec<EffectId> {
        self.state.lock().live.keys().copied().collect()
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EffectRegistry")
            .field("live", &state.live.len())
            .field("cancel_ids", &state.by_cancel_id.len())
            .finish()
    }
}

/// Ties a registry entry and a group membership to the lifetime of the
/// future running an instance
///
/// Dropping the guard removes the entry exactly once, whether the body
/// returned, was cancelled, or its task was aborted.
pub(crate) struct InstanceGuard {
    registry: Arc<EffectRegistry>,
    id: EffectId,
    group: Arc<TaskGroup>,
    completed: Option<Arc<AtomicBool>>,
}

impl InstanceGuard {
    /// Register `id` and join `group`
    pub(crate) fn start(
        registry: Arc<EffectRegistry>,
        group: Arc<TaskGroup>,
        kind: EffectKind,
        token: CancellationToken,
        cancel_ids: &[CancelId],
    ) -> Self {
        let id = EffectId::new();
        registry.register(id, kind, token, cancel_ids);
        group.enter();
        tracing::debug!(effect = %id, kind = ?kind, "effect started");
        Self {
            registry,
            id,
            group,
            completed: None,
        }
    }

    pub(crate) fn id(&self) -> EffectId {
        self.id
    }

    /// Flag raised when the instance finishes, before its entry is removed
    pub(crate) fn completion_flag(&mut self) -> Arc<AtomicBool> {
        Arc::clone(
            self.completed
                .get_or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Some(completed) = &self.completed {
            completed.store(true, Ordering::Release);
        }
        if !self.registry.remove(&self.id) {
            tracing::error!(effect = %self.id, "effect instance was removed from the registry twice");
        }
        self.group.leave();
        tracing::debug!(effect = %self.id, "effect finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(registry: &EffectRegistry, keys: &[CancelId]) -> (EffectId, CancellationToken) {
        let id = EffectId::new();
        let token = CancellationToken::new();
        registry.register(id, EffectKind::Task, token.clone(), keys);
        (id, token)
    }

    #[test]
    fn test_register_and_remove() {
        let registry = EffectRegistry::new();
        let (id, _) = register(&registry, &[]);

        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&id));
        assert!(registry.is_empty());
        assert!(!registry.remove(&id));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = EffectRegistry::new();
        let (id, token) = register(&registry, &[]);

        assert!(registry.cancel(&id));
        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());

        registry.remove(&id);
        assert!(!registry.cancel(&id));
        assert!(!registry.cancel(&EffectId::new()));
    }

    #[test]
    fn test_cancel_by_key_only_touches_that_key() {
        let registry = EffectRegistry::new();
        let timer = CancelId::new("timer");
        let (_, a) = register(&registry, &[timer.clone()]);
        let (_, b) = register(&registry, &[timer.clone()]);
        let (_, other) = register(&registry, &[CancelId::new("search")]);

        assert_eq!(registry.count_for(&timer), 2);
        assert_eq!(registry.cancel_by_key(&timer), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(!other.is_cancelled());
        assert_eq!(registry.cancel_by_key(&CancelId::new("missing")), 0);
    }

    #[test]
    fn test_remove_cleans_key_index() {
        let registry = EffectRegistry::new();
        let key = CancelId::new(1u8);
        let (id, _) = register(&registry, &[key.clone()]);

        registry.remove(&id);
        assert_eq!(registry.count_for(&key), 0);
        assert_eq!(registry.cancel_by_key(&key), 0);
    }

    #[test]
    fn test_cancel_all() {
        let registry = EffectRegistry::new();
        let (_, a) = register(&registry, &[]);
        let (_, b) = register(&registry, &[CancelId::new("k")]);

        registry.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        // Entries stay until their instances remove them
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let registry = Arc::new(EffectRegistry::new());
        let group = TaskGroup::new();
        let mut guard = InstanceGuard::start(
            Arc::clone(&registry),
            Arc::clone(&group),
            EffectKind::Stream,
            group.child_token(),
            &[CancelId::new("k")],
        );
        let completed = guard.completion_flag();
        let id = guard.id();

        assert!(registry.contains(&id));
        assert_eq!(group.pending(), 1);
        assert!(!completed.load(Ordering::Acquire));

        drop(guard);
        assert!(!registry.contains(&id));
        assert_eq!(group.pending(), 0);
        assert!(completed.load(Ordering::Acquire));
    }
}

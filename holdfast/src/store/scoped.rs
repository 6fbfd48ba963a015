//! Cores for stores derived from a parent store
//!
//! A scoped core holds no state of its own. Reads re-apply the projection
//! to the parent's current state and sends are rewritten into the
//! parent's action type.

use super::{Core, Shared};
use crate::task::StoreTask;
use crate::types::ScopeId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) type Project<P, C> = Box<dyn for<'a> Fn(&'a P) -> &'a C + Send + Sync>;
pub(crate) type ProjectPartial<P, C> = Box<dyn for<'a> Fn(&'a P) -> Option<&'a C> + Send + Sync>;
pub(crate) type ProjectOwned<P, C> = Box<dyn Fn(&P) -> C + Send + Sync>;
pub(crate) type Inject<CA, PA> = Box<dyn Fn(CA) -> PA + Send + Sync>;

/// Scope over a projection that always exists
pub(crate) struct ScopedCore<P, PA, C, CA> {
    base: Arc<dyn Core<P, PA>>,
    project: Project<P, C>,
    inject: Inject<CA, PA>,
}

impl<P, PA, C, CA> ScopedCore<P, PA, C, CA> {
    pub(crate) fn new(base: Arc<dyn Core<P, PA>>, project: Project<P, C>, inject: Inject<CA, PA>) -> Self {
        Self {
            base,
            project,
            inject,
        }
    }
}

impl<P, PA, C, CA> Core<C, CA> for ScopedCore<P, PA, C, CA>
where
    P: 'static,
    PA: 'static,
    C: 'static,
    CA: 'static,
{
    fn read(&self, f: &mut dyn FnMut(&C)) {
        self.base.read(&mut |parent: &P| f((self.project)(parent)));
    }

    fn send(&self, action: CA) -> StoreTask {
        self.base.send((self.inject)(action))
    }

    fn is_invalid(&self) -> bool {
        self.base.is_invalid()
    }

    fn can_cache_children(&self) -> bool {
        self.base.can_cache_children()
    }

    fn shared(&self) -> &Arc<Shared> {
        self.base.shared()
    }
}

/// Scope over a projection that may disappear
///
/// The core turns invalid, permanently, the first time the projection is
/// found absent or its parent is invalid. Reads after that return the
/// last value seen.
pub(crate) struct IfLetCore<P, PA, C, CA> {
    base: Arc<dyn Core<P, PA>>,
    project: ProjectPartial<P, C>,
    inject: Inject<CA, PA>,
    id: ScopeId,
    cached: Mutex<C>,
    invalid: AtomicBool,
}

impl<P, PA, C, CA> IfLetCore<P, PA, C, CA>
where
    C: Clone,
{
    /// Returns `None` if the projection is absent right now
    pub(crate) fn new(
        base: Arc<dyn Core<P, PA>>,
        project: ProjectPartial<P, C>,
        inject: Inject<CA, PA>,
        id: ScopeId,
    ) -> Option<Self> {
        let mut initial = None;
        base.read(&mut |parent: &P| initial = project(parent).cloned());
        Some(Self {
            cached: Mutex::new(initial?),
            base,
            project,
            inject,
            id,
            invalid: AtomicBool::new(false),
        })
    }

    fn invalidate(&self) {
        if !self.invalid.swap(true, Ordering::AcqRel) {
            tracing::debug!(scope = %self.id, "scope invalidated");
        }
    }
}

impl<P, PA, C, CA> Core<C, CA> for IfLetCore<P, PA, C, CA>
where
    P: 'static,
    PA: 'static,
    C: Clone + Send + 'static,
    CA: 'static,
{
    fn read(&self, f: &mut dyn FnMut(&C)) {
        if !self.is_invalid() {
            let mut seen = false;
            self.base.read(&mut |parent: &P| {
                if let Some(child) = (self.project)(parent) {
                    *self.cached.lock() = child.clone();
                    seen = true;
                    f(child);
                }
            });
            if seen {
                return;
            }
            // Removed between the validity check and the read
            self.invalidate();
        }
        let cached = self.cached.lock().clone();
        f(&cached);
    }

    fn send(&self, action: CA) -> StoreTask {
        self.base.send((self.inject)(action))
    }

    fn is_invalid(&self) -> bool {
        if self.invalid.load(Ordering::Acquire) {
            return true;
        }
        if self.base.is_invalid() {
            self.invalidate();
            return true;
        }
        let mut absent = false;
        self.base
            .read(&mut |parent: &P| absent = (self.project)(parent).is_none());
        if absent {
            self.invalidate();
        }
        absent
    }

    fn can_cache_children(&self) -> bool {
        self.base.can_cache_children()
    }

    fn shared(&self) -> &Arc<Shared> {
        self.base.shared()
    }
}

/// Scope over an owned projection
///
/// Its value is rebuilt on every read, so scopes derived from it are
/// never cached.
pub(crate) struct ClosureCore<P, PA, C, CA> {
    base: Arc<dyn Core<P, PA>>,
    project: ProjectOwned<P, C>,
    inject: Inject<CA, PA>,
}

impl<P, PA, C, CA> ClosureCore<P, PA, C, CA> {
    pub(crate) fn new(base: Arc<dyn Core<P, PA>>, project: ProjectOwned<P, C>, inject: Inject<CA, PA>) -> Self {
        Self {
            base,
            project,
            inject,
        }
    }
}

impl<P, PA, C, CA> Core<C, CA> for ClosureCore<P, PA, C, CA>
where
    P: 'static,
    PA: 'static,
    C: 'static,
    CA: 'static,
{
    fn read(&self, f: &mut dyn FnMut(&C)) {
        self.base.read(&mut |parent: &P| f(&(self.project)(parent)));
    }

    fn send(&self, action: CA) -> StoreTask {
        self.base.send((self.inject)(action))
    }

    fn is_invalid(&self) -> bool {
        self.base.is_invalid()
    }

    fn can_cache_children(&self) -> bool {
        false
    }

    fn shared(&self) -> &Arc<Shared> {
        self.base.shared()
    }
}

//! Core identity types for the holdfast runtime
//!
//! These are the identifiers used to track effect instances, group them
//! for cancellation, and key the scope cache.

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a live effect instance
///
/// Every unit of effect work launched by a store gets a fresh id. The id
/// is the key of the instance's entry in the effect registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectId(pub Uuid);

impl EffectId {
    /// Create a new unique effect id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fx:{}", &self.0.to_string()[..8])
    }
}

/// Object-safe view of a hashable key
trait DynKey: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> DynKey for T
where
    T: Hash + Eq + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Cancellation key for effects
///
/// Any `Hash + Eq + Debug` value can serve as a key. Keys of different
/// types never compare equal, so `CancelId::new(1u32)` and
/// `CancelId::new(1u64)` name different groups.
#[derive(Clone)]
pub struct CancelId(Arc<dyn DynKey>);

impl CancelId {
    /// Wrap a value as a cancellation key
    pub fn new<K>(key: K) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(key))
    }
}

impl PartialEq for CancelId {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(&*other.0)
    }
}

impl Eq for CancelId {}

impl Hash for CancelId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for CancelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelId(")?;
        self.0.dyn_fmt(f)?;
        f.write_str(")")
    }
}

/// Identity of a derived scope within its parent store
///
/// Closures cannot be compared, so call sites name their projection with
/// a pair of stable path descriptors. Collection scopes add an element
/// key with [`ScopeId::keyed`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ScopeId {
    state: Cow<'static, str>,
    action: Cow<'static, str>,
    key: Option<CancelId>,
}

impl ScopeId {
    /// Create a scope id from a state path and an action path
    pub fn new(state: impl Into<Cow<'static, str>>, action: impl Into<Cow<'static, str>>) -> Self {
        Self {
            state: state.into(),
            action: action.into(),
            key: None,
        }
    }

    /// Scope id for a single element of a keyed collection
    pub fn keyed<K>(mut self, key: K) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        self.key = Some(CancelId::new(key));
        self
    }

    /// The state path descriptor
    pub fn state_path(&self) -> &str {
        &self.state
    }

    /// The action path descriptor
    pub fn action_path(&self) -> &str {
        &self.action
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.state, self.action)?;
        if let Some(key) = &self.key {
            f.write_str("#")?;
            key.0.dyn_fmt(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({self})")
    }
}

/// Scheduling hint for task effects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
    Background,
}

impl TaskPriority {
    /// Whether the task should let other work run before it starts
    pub fn yields_first(&self) -> bool {
        matches!(self, TaskPriority::Low | TaskPriority::Background)
    }
}

//! Programmer-logic diagnostics
//!
//! Misuse of a store (sending into an invalidated scope, sending from an
//! effect that already finished, and so on) is never fatal. Each occurrence
//! is logged through `tracing` and kept in a bounded history that callers
//! can inspect.

use crate::types::{EffectId, ScopeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// How loudly a diagnostic is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A recoverable misuse of the store runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    /// A task effect kept its sender and used it after returning
    #[error("action {action} was sent from effect {effect} after it completed")]
    SendAfterCompletion { effect: EffectId, action: String },

    /// An action reached a scope whose projected state no longer exists
    #[error("action {action} was sent to invalidated scope {scope}; it was dropped")]
    SendToInvalidScope { scope: String, action: String },

    /// A partial projection was absent when the scope was first derived
    #[error("scope {scope} was not derived: its projected state is absent")]
    MissingProjection { scope: ScopeId },

    /// A scope was derived from a store that is itself invalid
    #[error("scope {scope} was derived from invalidated store {parent}")]
    ScopeOfInvalidStore { scope: ScopeId, parent: String },

    /// A partial scope was derived from a store that cannot cache children
    #[error("scope {scope} was derived from uncached store {parent}; identity is not stable")]
    UncachedScope { scope: ScopeId, parent: String },

    /// Asynchronous effect work was requested without a tokio runtime
    #[error("effect {effect} was dropped: no tokio runtime is available")]
    NoRuntime { effect: EffectId },

    /// A fallible effect failed and had no error handler
    #[error("effect {effect} failed with an unhandled error: {error}")]
    UnhandledEffectError { effect: EffectId, error: String },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::MissingProjection { .. } => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

/// Bounded diagnostic history shared by a root store and its scopes
#[derive(Debug)]
pub struct Diagnostics {
    store: String,
    capacity: usize,
    recent: Mutex<VecDeque<Diagnostic>>,
    total: AtomicU64,
}

impl Diagnostics {
    pub fn new(store: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store: store.into(),
            capacity,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            total: AtomicU64::new(0),
        }
    }

    /// Log a diagnostic and append it to the history
    pub fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Info => tracing::debug!(store = %self.store, "{}", diagnostic),
            Severity::Warning => tracing::warn!(store = %self.store, "{}", diagnostic),
        }

        self.total.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.lock();
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(diagnostic);
    }

    /// Copy of the retained diagnostics, oldest first
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Drain the retained diagnostics
    pub fn take(&self) -> Vec<Diagnostic> {
        self.recent.lock().drain(..).collect()
    }

    /// Number of diagnostics reported over the lifetime of the store,
    /// including those evicted from the history
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

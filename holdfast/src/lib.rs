//! Holdfast - reducer-driven state containers for Rust
//!
//! This crate provides a single-writer state container: actions go in,
//! a reducer mutates the state and describes side effects, and the effects
//! feed new actions back in. Narrower views of the state can be derived as
//! scopes that share the root's state and forward their actions upward.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Root store                          │
//! │  state (Arc snapshot)        reducer         action buffer  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │   send(action) ──► buffer ──► reduce ──► commit ──► notify  │
//! │        ▲                        │                           │
//! │        │                        ▼                           │
//! │        │               ┌─────────────────┐                  │
//! │        └───────────────│     Effects     │                  │
//! │          Sender        │ stream │ run    │                  │
//! │                        └────────┬────────┘                  │
//! │                                 │ register / remove         │
//! │                                 ▼                           │
//! │                        ┌─────────────────┐                  │
//! │                        │ EffectRegistry  │                  │
//! │                        └─────────────────┘                  │
//! │                                                             │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │                Scopes (cached by ScopeId)             │  │
//! │  │  ┌────────────────┐  ┌────────────────┐               │  │
//! │  │  │ scope          │  │ scope_if_let   │  ...          │  │
//! │  │  │ project/inject │  │ may invalidate │               │  │
//! │  │  └────────────────┘  └────────────────┘               │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Reducers and effects
//!
//! A [`Reducer`] mutates the state for one action and returns an
//! [`Effect`]: nothing, a stream of actions, an async body given a
//! [`Sender`], or a combination built with `merge` and `concatenate`.
//!
//! ## Dispatch
//!
//! Actions are processed strictly in the order they were buffered. An
//! action sent while another is being reduced (from a synchronous stream,
//! an effect task, or another thread) waits in the buffer until the
//! current reducer call returns. The new state is committed once the
//! buffer is empty and subscribers to [`Store::changes`] are notified once
//! per commit.
//!
//! ## Cancellation
//!
//! Every running effect is registered in the store's [`EffectRegistry`].
//! [`StoreTask::cancel`] stops everything one `send` started;
//! [`Effect::cancellable`] and [`Effect::cancel`] stop work by key.
//!
//! ## Scopes
//!
//! [`Store::scope`] and friends derive child stores. Deriving the same
//! [`ScopeId`] twice returns the same store. Scopes over optional or keyed
//! state become invalid, permanently, once that state disappears; sends to
//! an invalid scope are dropped and reported as a [`Diagnostic`].
//!
//! # Example
//!
//! ```rust
//! use holdfast::{Effect, Store};
//!
//! #[derive(Clone, Default)]
//! struct Counter {
//!     count: i64,
//! }
//!
//! #[derive(Debug)]
//! enum Action {
//!     Increment,
//!     IncrementTwice,
//! }
//!
//! let store = Store::new(Counter::default(), |state: &mut Counter, action: Action| {
//!     match action {
//!         Action::Increment => {
//!             state.count += 1;
//!             Effect::none()
//!         }
//!         Action::IncrementTwice => {
//!             Effect::send(Action::Increment).concatenate(Effect::send(Action::Increment))
//!         }
//!     }
//! });
//!
//! store.send(Action::IncrementTwice);
//! assert_eq!(store.state().count, 2);
//! ```

pub mod config;
pub mod diagnostics;
pub mod effect;
pub mod reducer;
pub mod registry;
pub mod store;
pub mod task;
pub mod types;

pub use config::{ConfigError, StoreConfig};
pub use diagnostics::{Diagnostic, Severity};
pub use effect::{Effect, Sender};
pub use reducer::Reducer;
pub use registry::{EffectKind, EffectRegistry};
pub use store::{Store, StoreBuilder};
pub use task::StoreTask;
pub use types::{CancelId, EffectId, ScopeId, TaskPriority};

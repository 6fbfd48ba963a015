//! Effect descriptors
//!
//! An [`Effect`] is an inert description of side-effecting work that a
//! reducer asks the store to perform. Nothing runs until the store
//! launches it, and each descriptor is consumed by that launch.
//!
//! Effects are built from three kinds of operation:
//!
//! - a **stream** of actions, fed back into the store as they arrive
//! - a **run** body, an async closure handed a [`Sender`]
//! - a **cancel** marker, which stops in-flight work registered under a key
//!
//! and combined with [`Effect::merge`] (concurrently) or
//! [`Effect::concatenate`] (in sequence).

mod sender;
mod throttle;

pub use sender::Sender;
pub(crate) use sender::EffectContext;
pub(crate) use throttle::Throttles;

use crate::diagnostics::Diagnostic;
use crate::registry::EffectKind;
use crate::types::{CancelId, EffectId, TaskPriority};
use throttle::Admission;
use futures::future::{join_all, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) type RunBody<A> = Box<dyn FnOnce(Sender<A>) -> BoxFuture<'static, ()> + Send>;

pub(crate) enum Operation<A> {
    Stream {
        stream: BoxStream<'static, A>,
        cancel_ids: Vec<CancelId>,
    },
    Run {
        priority: Option<TaskPriority>,
        body: RunBody<A>,
        cancel_ids: Vec<CancelId>,
    },
    Cancel(CancelId),
}

impl<A: Send + 'static> Operation<A> {
    fn is_cancel(&self) -> bool {
        matches!(self, Operation::Cancel(_))
    }

    fn is_plain_stream(&self) -> bool {
        matches!(self, Operation::Stream { cancel_ids, .. } if cancel_ids.is_empty())
    }

    fn with_cancel_id(self, key: &CancelId) -> Self {
        match self {
            Operation::Stream {
                stream,
                mut cancel_ids,
            } => {
                cancel_ids.push(key.clone());
                Operation::Stream { stream, cancel_ids }
            }
            Operation::Run {
                priority,
                body,
                mut cancel_ids,
            } => {
                cancel_ids.push(key.clone());
                Operation::Run {
                    priority,
                    body,
                    cancel_ids,
                }
            }
            cancel => cancel,
        }
    }

    fn map<B: Send + 'static>(self, f: Arc<dyn Fn(A) -> B + Send + Sync>) -> Operation<B> {
        match self {
            Operation::Stream { stream, cancel_ids } => Operation::Stream {
                stream: stream.map(move |action| f(action)).boxed(),
                cancel_ids,
            },
            Operation::Run {
                priority,
                body,
                cancel_ids,
            } => Operation::Run {
                priority,
                body: Box::new(move |send: Sender<B>| body(send.contramap(f))),
                cancel_ids,
            },
            Operation::Cancel(key) => Operation::Cancel(key),
        }
    }

    /// Start this operation inside an already running instance
    ///
    /// Cancellation and registration happen immediately; the returned
    /// future carries the remaining asynchronous work.
    fn drive(self, send: &Sender<A>) -> Option<BoxFuture<'static, ()>> {
        match self {
            Operation::Cancel(key) => {
                send.cancel_by_key(&key);
                None
            }
            Operation::Stream {
                mut stream,
                cancel_ids,
            } => Some(send.nested(EffectKind::Stream, &cancel_ids, move |send| {
                async move {
                    while let Some(action) = stream.next().await {
                        send.send(action);
                    }
                }
                .boxed()
            })),
            Operation::Run {
                priority,
                body,
                cancel_ids,
            } => Some(send.nested(EffectKind::Task, &cancel_ids, move |send| {
                async move {
                    if priority.is_some_and(|p| p.yields_first()) {
                        tokio::task::yield_now().await;
                    }
                    body(send).await;
                }
                .boxed()
            })),
        }
    }
}

/// Declarative side-effecting work returned by a reducer
#[must_use = "effects do nothing unless returned from a reducer"]
pub struct Effect<A> {
    pub(crate) operations: Vec<Operation<A>>,
}

impl<A: Send + 'static> Effect<A> {
    fn from_operation(operation: Operation<A>) -> Self {
        Self {
            operations: vec![operation],
        }
    }

    /// An effect that does nothing
    pub fn none() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Whether this effect has no work at all
    pub fn is_none(&self) -> bool {
        self.operations.is_empty()
    }

    /// Feed a single action back into the store right away
    ///
    /// The action is processed in the same dispatch cycle, after the
    /// current action's mutation has been applied.
    pub fn send(action: A) -> Self {
        Self::stream(stream::iter([action]))
    }

    /// Feed every item of a stream back into the store
    ///
    /// Items the stream has ready immediately are processed in the
    /// current dispatch cycle; the rest arrive from a runtime task.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = A> + Send + 'static,
    {
        Self::from_operation(Operation::Stream {
            stream: stream.boxed(),
            cancel_ids: Vec::new(),
        })
    }

    /// Run an async body that may send any number of actions
    pub fn run<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Sender<A>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::run_inner(None, body)
    }

    /// [`Effect::run`] with a scheduling hint
    pub fn run_with_priority<F, Fut>(priority: TaskPriority, body: F) -> Self
    where
        F: FnOnce(Sender<A>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::run_inner(Some(priority), body)
    }

    fn run_inner<F, Fut>(priority: Option<TaskPriority>, body: F) -> Self
    where
        F: FnOnce(Sender<A>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::from_operation(Operation::Run {
            priority,
            body: Box::new(move |send| body(send).boxed()),
            cancel_ids: Vec::new(),
        })
    }

    /// Run a fallible body
    ///
    /// An error ends the effect and is reported as
    /// [`Diagnostic::UnhandledEffectError`]. Use
    /// [`Effect::try_run_or_else`] to turn errors into actions instead.
    pub fn try_run<F, Fut, E>(body: F) -> Self
    where
        F: FnOnce(Sender<A>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self::run(move |send| async move {
            if let Err(error) = body(send.clone()).await {
                send.report(Diagnostic::UnhandledEffectError {
                    effect: send.effect_id(),
                    error: error.to_string(),
                });
            }
        })
    }

    /// Run a fallible body, handing any error to `handler`
    ///
    /// The handler is not called if the effect was cancelled.
    pub fn try_run_or_else<F, Fut, E, H>(body: F, handler: H) -> Self
    where
        F: FnOnce(Sender<A>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Send + 'static,
        H: FnOnce(E, Sender<A>) + Send + 'static,
    {
        Self::run(move |send| async move {
            if let Err(error) = body(send.clone()).await {
                handler(error, send);
            }
        })
    }

    /// Run async work that never sends
    pub fn fire_and_forget<F, Fut>(work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::run(move |_| work())
    }

    /// Cancel every in-flight effect registered under `id`
    pub fn cancel<K>(id: K) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        Self::from_operation(Operation::Cancel(CancelId::new(id)))
    }

    /// Register this effect's work under `id` so it can be cancelled
    ///
    /// With `cancel_in_flight`, work already registered under `id` is
    /// cancelled before this effect starts.
    pub fn cancellable<K>(self, id: K, cancel_in_flight: bool) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        self.cancellable_key(CancelId::new(id), cancel_in_flight)
    }

    fn cancellable_key(self, key: CancelId, cancel_in_flight: bool) -> Self {
        if self.is_none() {
            return self;
        }
        let mut operations = Vec::with_capacity(self.operations.len() + 1);
        if cancel_in_flight {
            operations.push(Operation::Cancel(key.clone()));
        }
        operations.extend(self.operations.into_iter().map(|op| op.with_cancel_id(&key)));
        Self { operations }
    }

    /// Run both effects concurrently
    pub fn merge(mut self, other: Self) -> Self {
        self.operations.extend(other.operations);
        self
    }

    /// Run all effects concurrently
    pub fn merge_all(effects: impl IntoIterator<Item = Self>) -> Self {
        effects.into_iter().fold(Self::none(), Self::merge)
    }

    /// Run `other` once this effect has completely finished
    pub fn concatenate(mut self, other: Self) -> Self {
        if other.is_none() {
            return self;
        }
        if self.is_none() {
            return other;
        }
        if self.operations.iter().all(Operation::is_cancel) {
            self.operations.extend(other.operations);
            return self;
        }
        if self.operations.iter().all(Operation::is_plain_stream)
            && other.operations.iter().all(Operation::is_plain_stream)
        {
            let first = stream::select_all(self.into_streams());
            let second = stream::select_all(other.into_streams());
            return Self::stream(first.chain(second));
        }
        Self::run(move |send| async move {
            self.drive(send.clone()).await;
            other.drive(send).await;
        })
    }

    /// Run effects one after another
    pub fn concatenate_all(effects: impl IntoIterator<Item = Self>) -> Self {
        effects.into_iter().fold(Self::none(), Self::concatenate)
    }

    /// Transform the actions this effect produces
    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let f: Arc<dyn Fn(A) -> B + Send + Sync> = Arc::new(f);
        Effect {
            operations: self
                .operations
                .into_iter()
                .map(|op| op.map(Arc::clone(&f)))
                .collect(),
        }
    }

    /// Start this effect only after `duration` has elapsed
    pub fn delay(self, duration: Duration) -> Self {
        if self.is_none() {
            return self;
        }
        Self::run(move |send| async move {
            tokio::time::sleep(duration).await;
            self.drive(send).await;
        })
    }

    /// Delay this effect, cancelling any earlier one still waiting under `id`
    pub fn debounce<K>(self, id: K, duration: Duration) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        self.delay(duration).cancellable(id, true)
    }

    /// Emit at most one action per `interval` for `id`
    ///
    /// The first action for `id` passes straight through. Actions arriving
    /// before the interval has elapsed are held until it does; with
    /// `latest` the newest held action is emitted, otherwise the oldest.
    /// A newer throttled effect under the same `id` replaces one that is
    /// still waiting.
    pub fn throttle<K>(self, id: K, interval: Duration, latest: bool) -> Self
    where
        K: Hash + Eq + fmt::Debug + Send + Sync + 'static,
    {
        if self.is_none() {
            return self;
        }
        let key = CancelId::new(id);
        let gate = key.clone();
        Self::run(move |send| async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let upstream = send.redirect(Arc::new(move |_: EffectId, action: A| {
                let _ = tx.send(action);
            }));
            let mut upstream = self.drive(upstream);
            loop {
                tokio::select! {
                    biased;
                    Some(action) = rx.recv() => throttled(&send, &gate, action, interval, latest).await,
                    _ = &mut upstream => break,
                }
            }
            while let Ok(action) = rx.try_recv() {
                throttled(&send, &gate, action, interval, latest).await;
            }
        })
        .cancellable_key(key, true)
    }

    fn into_streams(self) -> Vec<BoxStream<'static, A>> {
        self.operations
            .into_iter()
            .filter_map(|op| match op {
                Operation::Stream { stream, .. } => Some(stream),
                _ => None,
            })
            .collect()
    }

    /// Drive every operation to completion inside a running instance
    pub(crate) fn drive(self, send: Sender<A>) -> BoxFuture<'static, ()> {
        let running: Vec<_> = self
            .operations
            .into_iter()
            .filter_map(|op| op.drive(&send))
            .collect();
        join_all(running).map(|_| ()).boxed()
    }
}

async fn throttled<A: Send + 'static>(
    send: &Sender<A>,
    key: &CancelId,
    action: A,
    interval: Duration,
    latest: bool,
) {
    match send.throttles().admit(key, action, interval, latest) {
        Admission::Now(action) => send.send(action),
        Admission::At(deadline) => {
            tokio::time::sleep_until(deadline).await;
            if let Some(action) = send.throttles().release(key) {
                send.send(action);
            }
        }
    }
}

impl<A: Send + 'static> Default for Effect<A> {
    fn default() -> Self {
        Self::none()
    }
}

impl<A: Send + 'static> FromIterator<Effect<A>> for Effect<A> {
    fn from_iter<I: IntoIterator<Item = Effect<A>>>(iter: I) -> Self {
        Self::merge_all(iter)
    }
}

impl<A> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for op in &self.operations {
            match op {
                Operation::Stream { cancel_ids, .. } => list.entry(&format_args!("stream{cancel_ids:?}")),
                Operation::Run {
                    priority, cancel_ids, ..
                } => list.entry(&format_args!("run({priority:?}){cancel_ids:?}")),
                Operation::Cancel(key) => list.entry(&format_args!("cancel({key:?})")),
            };
        }
        list.finish()
    }
}

//! Root store core: owns the state and runs the dispatch loop
//!
//! Sends are trampolined. The first caller to find the loop idle becomes
//! the drainer and processes the buffer until it is empty, including
//! actions that arrive from effects or other threads while it runs. Every
//! other caller only appends to the buffer. Reducers therefore never run
//! concurrently and never re-enter each other.

use super::{Core, Shared};
use crate::config::StoreConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::effect::{Effect, EffectContext, Operation, RunBody, Sender, Throttles};
use crate::reducer::Reducer;
use crate::registry::{EffectKind, EffectRegistry, InstanceGuard};
use crate::task::{StoreTask, TaskGroup};
use crate::types::{CancelId, EffectId, TaskPriority};
use futures::future::FutureExt;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

struct Buffered<A> {
    action: A,
    group: Arc<TaskGroup>,
}

struct ActionQueue<A> {
    buffered: VecDeque<Buffered<A>>,
    is_sending: bool,
}

pub(crate) struct RootCore<S, A> {
    state: RwLock<Arc<S>>,
    reducer: Box<dyn Reducer<S, A>>,
    queue: Mutex<ActionQueue<A>>,
    shared: Arc<Shared>,
    runtime: Option<Handle>,
    this: Weak<Self>,
}

impl<S, A> RootCore<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
{
    pub(crate) fn new(
        initial: S,
        reducer: Box<dyn Reducer<S, A>>,
        config: StoreConfig,
        runtime: Option<Handle>,
    ) -> Arc<Self> {
        let (changes, _) = broadcast::channel(config.change_buffer);
        let shared = Arc::new(Shared {
            registry: Arc::new(EffectRegistry::new()),
            diagnostics: Arc::new(Diagnostics::new(
                config.name.clone(),
                config.diagnostic_history,
            )),
            changes,
            version: AtomicU64::new(0),
            throttles: Arc::new(Throttles::new()),
            config,
        });
        Arc::new_cyclic(|this| Self {
            state: RwLock::new(Arc::new(initial)),
            reducer,
            queue: Mutex::new(ActionQueue {
                buffered: VecDeque::new(),
                is_sending: false,
            }),
            shared,
            runtime,
            this: this.clone(),
        })
    }

    /// Buffer an action for `group`, draining the buffer if no one else is
    fn enqueue(&self, action: A, group: Arc<TaskGroup>) {
        group.enter();
        {
            let mut queue = self.queue.lock();
            queue.buffered.push_back(Buffered { action, group });
            if queue.is_sending {
                return;
            }
            queue.is_sending = true;
        }
        self.drain();
    }

    fn next_buffered(&self) -> Option<Buffered<A>> {
        self.queue.lock().buffered.pop_front()
    }

    fn drain(&self) {
        let mut held = HeldGroups {
            queue: &self.queue,
            groups: Vec::new(),
        };
        let span = tracing::debug_span!("drain", store = %self.shared.config.name);
        let _entered = span.enter();

        loop {
            let mut working = S::clone(&self.state.read());

            // Groups stay held until after the commit so a finished task
            // always observes its actions' state
            while let Some(Buffered { action, group }) = self.next_buffered() {
                held.groups.push(Arc::clone(&group));
                tracing::trace!(action = ?action, "reduce");
                let effect = self.reducer.reduce(&mut working, action);
                if !effect.is_none() {
                    self.launch(effect, &group);
                }
            }

            self.commit(working, held.groups.len());
            held.release();

            let mut queue = self.queue.lock();
            if queue.buffered.is_empty() {
                queue.is_sending = false;
                return;
            }
        }
    }

    fn commit(&self, working: S, applied: usize) {
        *self.state.write() = Arc::new(working);
        let version = self.shared.version.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(version, actions = applied, "state committed");
        // No subscribers is fine
        let _ = self.shared.changes.send(version);
    }

    fn launch(&self, effect: Effect<A>, group: &Arc<TaskGroup>) {
        for operation in effect.operations {
            match operation {
                Operation::Cancel(key) => {
                    self.shared.registry.cancel_by_key(&key);
                }
                Operation::Stream { stream, cancel_ids } => {
                    self.launch_stream(stream, &cancel_ids, group);
                }
                Operation::Run {
                    priority,
                    body,
                    cancel_ids,
                } => {
                    self.launch_run(priority, body, &cancel_ids, group);
                }
            }
        }
    }

    fn launch_stream(
        &self,
        mut stream: BoxStream<'static, A>,
        cancel_ids: &[CancelId],
        group: &Arc<TaskGroup>,
    ) {
        let token = group.child_token();
        let guard = self.start_instance(EffectKind::Stream, &token, cancel_ids, group);
        let send = self.sender(guard.id(), token.clone(), group, None);

        // Items that are ready now join the current drain
        for _ in 0..self.shared.config.max_sync_emissions {
            if token.is_cancelled() {
                return;
            }
            match stream.next().now_or_never() {
                Some(Some(action)) => send.send(action),
                Some(None) => return,
                None => break,
            }
        }

        let Some(runtime) = &self.runtime else {
            self.shared
                .diagnostics
                .report(Diagnostic::NoRuntime { effect: guard.id() });
            return;
        };
        runtime.spawn(async move {
            let _guard = guard;
            tokio::select! {
                _ = token.cancelled() => {}
                _ = async {
                    while let Some(action) = stream.next().await {
                        send.send(action);
                    }
                } => {}
            }
        });
    }

    fn launch_run(
        &self,
        priority: Option<TaskPriority>,
        body: RunBody<A>,
        cancel_ids: &[CancelId],
        group: &Arc<TaskGroup>,
    ) {
        let token = group.child_token();
        let mut guard = self.start_instance(EffectKind::Task, &token, cancel_ids, group);

        let Some(runtime) = &self.runtime else {
            self.shared
                .diagnostics
                .report(Diagnostic::NoRuntime { effect: guard.id() });
            return;
        };

        let completed = guard.completion_flag();
        let send = self.sender(guard.id(), token.clone(), group, Some(completed));
        tracing::trace!(effect = %guard.id(), ?priority, "spawning task effect");
        runtime.spawn(async move {
            let _guard = guard;
            if priority.is_some_and(|p| p.yields_first()) {
                tokio::task::yield_now().await;
            }
            tokio::select! {
                _ = token.cancelled() => {}
                _ = body(send) => {}
            }
        });
    }

    fn start_instance(
        &self,
        kind: EffectKind,
        token: &CancellationToken,
        cancel_ids: &[CancelId],
        group: &Arc<TaskGroup>,
    ) -> InstanceGuard {
        InstanceGuard::start(
            Arc::clone(&self.shared.registry),
            Arc::clone(group),
            kind,
            token.clone(),
            cancel_ids,
        )
    }

    fn sender(
        &self,
        effect: EffectId,
        token: CancellationToken,
        group: &Arc<TaskGroup>,
        completed: Option<Arc<AtomicBool>>,
    ) -> Sender<A> {
        let core = self.this.clone();
        let diagnostics = Arc::clone(&self.shared.diagnostics);
        let sink_group = Arc::clone(group);
        let sink = Arc::new(move |effect: EffectId, action: A| {
            if completed
                .as_ref()
                .is_some_and(|completed| completed.load(Ordering::Acquire))
            {
                diagnostics.report(Diagnostic::SendAfterCompletion {
                    effect,
                    action: format!("{action:?}"),
                });
            }
            match core.upgrade() {
                Some(core) => core.enqueue(action, Arc::clone(&sink_group)),
                None => tracing::trace!(effect = %effect, "store dropped; discarding action"),
            }
        });
        let context = Arc::new(EffectContext {
            registry: Arc::clone(&self.shared.registry),
            diagnostics: Arc::clone(&self.shared.diagnostics),
            group: Arc::clone(group),
            throttles: Arc::clone(&self.shared.throttles),
        });
        Sender::new(sink, token, effect, context)
    }
}

impl<S, A> Core<S, A> for RootCore<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
{
    fn read(&self, f: &mut dyn FnMut(&S)) {
        let snapshot = Arc::clone(&self.state.read());
        f(&snapshot);
    }

    fn send(&self, action: A) -> StoreTask {
        let group = TaskGroup::new();
        self.enqueue(action, Arc::clone(&group));
        StoreTask::new(group)
    }

    fn is_invalid(&self) -> bool {
        false
    }

    fn can_cache_children(&self) -> bool {
        self.shared.config.cache_children
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl<S, A> Drop for RootCore<S, A> {
    fn drop(&mut self) {
        self.shared.registry.cancel_all();
    }
}

/// Groups taken from the buffer by the current drain
///
/// If a reducer panics mid-drain, dropping this releases every held and
/// still-buffered group and leaves the loop usable for the next send.
struct HeldGroups<'a, A> {
    queue: &'a Mutex<ActionQueue<A>>,
    groups: Vec<Arc<TaskGroup>>,
}

impl<A> HeldGroups<'_, A> {
    fn release(&mut self) {
        for group in self.groups.drain(..) {
            group.leave();
        }
    }
}

impl<A> Drop for HeldGroups<'_, A> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        tracing::error!(held = self.groups.len(), "reducer panicked; discarding uncommitted actions");
        self.release();
        let mut queue = self.queue.lock();
        for buffered in queue.buffered.drain(..) {
            buffered.group.leave();
        }
        queue.is_sending = false;
    }
}

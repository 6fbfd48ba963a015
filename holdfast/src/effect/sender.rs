//! The `send` callback handed to effect bodies

use super::throttle::Throttles;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::registry::{EffectKind, EffectRegistry, InstanceGuard};
use crate::task::TaskGroup;
use crate::types::{CancelId, EffectId};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared plumbing an effect body needs to start nested instances
pub(crate) struct EffectContext {
    pub(crate) registry: Arc<EffectRegistry>,
    pub(crate) diagnostics: Arc<Diagnostics>,
    pub(crate) group: Arc<TaskGroup>,
    pub(crate) throttles: Arc<Throttles>,
}

/// Feeds actions from a running effect back into its store
///
/// Actions sent after the effect was cancelled are dropped. Actions sent
/// after the effect's body returned still reach the store, but are
/// reported as a [`Diagnostic::SendAfterCompletion`].
pub struct Sender<A> {
    sink: Arc<dyn Fn(EffectId, A) + Send + Sync>,
    token: CancellationToken,
    effect: EffectId,
    context: Arc<EffectContext>,
}

impl<A> Clone for Sender<A> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            token: self.token.clone(),
            effect: self.effect,
            context: Arc::clone(&self.context),
        }
    }
}

impl<A: Send + 'static> Sender<A> {
    pub(crate) fn new(
        sink: Arc<dyn Fn(EffectId, A) + Send + Sync>,
        token: CancellationToken,
        effect: EffectId,
        context: Arc<EffectContext>,
    ) -> Self {
        Self {
            sink,
            token,
            effect,
            context,
        }
    }

    /// Send an action to the store
    pub fn send(&self, action: A) {
        if self.token.is_cancelled() {
            tracing::trace!(effect = %self.effect, "dropping action from cancelled effect");
            return;
        }
        (self.sink)(self.effect, action);
    }

    /// Whether the effect sending through this callback was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the effect is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Id of the effect instance this sender belongs to
    pub fn effect_id(&self) -> EffectId {
        self.effect
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        self.context.diagnostics.report(diagnostic);
    }

    pub(crate) fn cancel_by_key(&self, key: &CancelId) {
        self.context.registry.cancel_by_key(key);
    }

    pub(crate) fn throttles(&self) -> &Throttles {
        &self.context.throttles
    }

    /// The same effect instance, delivering to `sink` instead of the store
    pub(crate) fn redirect(&self, sink: Arc<dyn Fn(EffectId, A) + Send + Sync>) -> Sender<A> {
        Sender {
            sink,
            token: self.token.clone(),
            effect: self.effect,
            context: Arc::clone(&self.context),
        }
    }

    /// A sender of `B` that converts into `A` before sending
    pub(crate) fn contramap<B: Send + 'static>(
        &self,
        f: Arc<dyn Fn(B) -> A + Send + Sync>,
    ) -> Sender<B> {
        let sink = Arc::clone(&self.sink);
        Sender {
            sink: Arc::new(move |effect, action| sink(effect, f(action))),
            token: self.token.clone(),
            effect: self.effect,
            context: Arc::clone(&self.context),
        }
    }

    /// Run `body` as its own registry entry when it carries cancel ids
    ///
    /// Without cancel ids the body simply runs as part of this sender's
    /// instance.
    pub(crate) fn nested(
        &self,
        kind: EffectKind,
        cancel_ids: &[CancelId],
        body: impl FnOnce(Sender<A>) -> BoxFuture<'static, ()>,
    ) -> BoxFuture<'static, ()> {
        if cancel_ids.is_empty() {
            return body(self.clone());
        }

        let token = self.token.child_token();
        let guard = InstanceGuard::start(
            Arc::clone(&self.context.registry),
            Arc::clone(&self.context.group),
            kind,
            token.clone(),
            cancel_ids,
        );
        let send = Sender {
            sink: Arc::clone(&self.sink),
            token: token.clone(),
            effect: guard.id(),
            context: Arc::clone(&self.context),
        };
        let body = body(send);
        async move {
            let _guard = guard;
            tokio::select! {
                _ = token.cancelled() => {}
                _ = body => {}
            }
        }
        .boxed()
    }
}

impl<A> std::fmt::Debug for Sender<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("effect", &self.effect)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::recorder;
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_send_forwards_until_cancelled() {
        let rec = recorder::<u32>();
        rec.sender.send(1);
        rec.token.cancel();
        rec.sender.send(2);

        assert_eq!(*rec.received.lock(), vec![1]);
        assert!(rec.sender.is_cancelled());
    }

    #[test]
    fn test_contramap_converts() {
        let rec = recorder::<String>();
        let numbers: Sender<u32> = rec.sender.contramap(Arc::new(|n: u32| format!("#{n}")));
        numbers.send(4);
        assert_eq!(*rec.received.lock(), vec!["#4".to_string()]);
    }

    #[test]
    fn test_redirect_keeps_cancellation() {
        let rec = recorder::<u32>();
        let redirected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&redirected);
        let other = rec.sender.redirect(Arc::new(move |_, action| sink.lock().push(action)));

        other.send(1);
        rec.token.cancel();
        other.send(2);

        assert_eq!(*redirected.lock(), vec![1]);
        assert!(rec.received.lock().is_empty());
        assert_eq!(other.effect_id(), rec.sender.effect_id());
    }

    #[tokio::test]
    async fn test_nested_registers_until_done() {
        let rec = recorder::<u32>();
        let key = CancelId::new("nested");
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let fut = rec.sender.nested(EffectKind::Task, &[key.clone()], move |send| {
            async move {
                let _ = release_rx.await;
                send.send(9);
            }
            .boxed()
        });
        assert_eq!(rec.registry.count_for(&key), 1);

        let handle = tokio::spawn(fut);
        release_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(rec.registry.is_empty());
        assert_eq!(*rec.received.lock(), vec![9]);
    }

    #[tokio::test]
    async fn test_nested_cancel_by_key() {
        let rec = recorder::<u32>();
        let key = CancelId::new("nested");

        let fut = rec.sender.nested(EffectKind::Task, &[key.clone()], |send| {
            async move {
                std::future::pending::<()>().await;
                send.send(1);
            }
            .boxed()
        });
        let handle = tokio::spawn(fut);
        rec.sender.cancel_by_key(&key);
        handle.await.unwrap();

        assert!(rec.registry.is_empty());
        assert!(rec.received.lock().is_empty());
    }
}

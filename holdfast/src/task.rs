//! Composite handles for everything a single `send` sets in motion
//!
//! Each call to `send` opens a [`TaskGroup`]. The group counts the
//! buffered actions and live effect instances that belong to it; actions
//! emitted by an effect join the emitting instance's group, so the count
//! covers the whole transitive tree. [`StoreTask`] is the caller-facing
//! view of a group.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub(crate) struct TaskGroup {
    token: CancellationToken,
    pending: watch::Sender<usize>,
}

impl TaskGroup {
    pub(crate) fn new() -> Arc<Self> {
        let (pending, _) = watch::channel(0);
        Arc::new(Self {
            token: CancellationToken::new(),
            pending,
        })
    }

    /// Token for a new effect instance in this group
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub(crate) fn enter(&self) {
        self.pending.send_modify(|n| *n += 1);
    }

    pub(crate) fn leave(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn finished(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Handle to the work started by one `send`
///
/// Awaiting [`StoreTask::finish`] waits for every effect the action
/// transitively produced. [`StoreTask::cancel`] stops all of them without
/// touching effects started by other sends.
#[derive(Clone)]
pub struct StoreTask {
    group: Option<Arc<TaskGroup>>,
}

impl StoreTask {
    pub(crate) fn new(group: Arc<TaskGroup>) -> Self {
        Self { group: Some(group) }
    }

    /// A task with nothing to wait for
    pub(crate) fn finished() -> Self {
        Self { group: None }
    }

    /// Cancel every effect instance spawned by this send
    pub fn cancel(&self) {
        if let Some(group) = &self.group {
            group.cancel();
        }
    }

    /// Wait until every effect spawned by this send has completed or
    /// been cancelled
    pub async fn finish(&self) {
        if let Some(group) = &self.group {
            group.finished().await;
        }
    }

    /// Like [`StoreTask::finish`], but dropping the returned future before
    /// it completes cancels the work
    pub async fn cancellable_finish(&self) {
        let Some(group) = &self.group else {
            return;
        };
        let mut on_drop = CancelOnDrop(Some(Arc::clone(group)));
        group.finished().await;
        on_drop.disarm();
    }

    pub fn is_finished(&self) -> bool {
        self.group.as_ref().map_or(true, |group| group.pending() == 0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.group.as_ref().is_some_and(|group| group.is_cancelled())
    }
}

impl std::fmt::Debug for StoreTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTask")
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct CancelOnDrop(Option<Arc<TaskGroup>>);

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(group) = self.0.take() {
            group.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_finished_task() {
        let task = StoreTask::finished();
        assert!(task.is_finished());
        assert!(!task.is_cancelled());
        task.cancel();
        assert!(!task.is_cancelled());
    }

    #[test]
    fn test_pending_count() {
        let group = TaskGroup::new();
        let task = StoreTask::new(Arc::clone(&group));
        assert!(task.is_finished());

        group.enter();
        group.enter();
        assert!(!task.is_finished());

        group.leave();
        group.leave();
        assert!(task.is_finished());

        group.leave();
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn test_cancel_reaches_child_tokens() {
        let group = TaskGroup::new();
        let child = group.child_token();
        StoreTask::new(Arc::clone(&group)).cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_finish_waits_for_leave() {
        let group = TaskGroup::new();
        group.enter();
        let task = StoreTask::new(Arc::clone(&group));

        let waiter = tokio::spawn(async move { task.finish().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        group.leave();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropping_cancellable_finish_cancels() {
        let group = TaskGroup::new();
        group.enter();
        let task = StoreTask::new(Arc::clone(&group));

        let result = tokio::time::timeout(Duration::from_millis(10), task.cancellable_finish()).await;
        assert!(result.is_err());
        assert!(group.is_cancelled());
    }
}

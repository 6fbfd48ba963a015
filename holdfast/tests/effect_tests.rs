//! Integration tests for effect lifecycles and cancellation

use futures::stream;
use holdfast::{Diagnostic, Effect, Store, TaskPriority};
use parking_lot::Mutex;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, Default, PartialEq)]
struct Timer {
    ticks: u32,
    query: String,
    results: Vec<String>,
}

#[derive(Debug, Clone)]
enum Action {
    Hang,
    HangEverywhere,
    StartTimer,
    StopTimer,
    Tick,
    Search(String),
    Searched(String),
    Chain,
    Step,
    Background,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TimerId;

fn timer(state: &mut Timer, action: Action) -> Effect<Action> {
    match action {
        Action::Hang => Effect::run(|_| async { pending::<()>().await }),
        Action::HangEverywhere => Effect::merge_all([
            Effect::run(|_| async { pending::<()>().await }),
            Effect::stream(stream::pending()),
            Effect::run(|_| async { pending::<()>().await })
                .concatenate(Effect::run(|_| async {})),
            Effect::stream(stream::pending()).cancellable("hang", false),
        ]),
        Action::StartTimer => Effect::run(|send| async move {
            loop {
                sleep(Duration::from_millis(5)).await;
                send.send(Action::Tick);
            }
        })
        .cancellable(TimerId, true),
        Action::StopTimer => Effect::cancel(TimerId),
        Action::Tick => {
            state.ticks += 1;
            Effect::none()
        }
        Action::Search(query) => {
            state.query = query.clone();
            Effect::send(Action::Searched(query)).debounce("search", Duration::from_millis(30))
        }
        Action::Searched(query) => {
            state.results.push(query);
            Effect::none()
        }
        Action::Chain => Effect::send(Action::Step).concatenate(Effect::run(|send| async move {
            sleep(Duration::from_millis(5)).await;
            send.send(Action::Step);
        })),
        Action::Step => {
            state.ticks += 1;
            Effect::none()
        }
        Action::Background => Effect::run_with_priority(TaskPriority::Background, |send| async move {
            send.send(Action::Step);
        }),
        Action::Fail => Effect::try_run(|_| async {
            Err::<(), _>(std::io::Error::other("connection reset"))
        }),
    }
}

async fn wait_for_effects<S, A>(store: &Store<S, A>, expected: usize)
where
    S: Send + Sync + 'static,
    A: std::fmt::Debug + Send + 'static,
{
    timeout(Duration::from_secs(1), async {
        while store.effect_count() != expected {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_cancelling_send_empties_registry() {
    let store = Store::new(Timer::default(), timer);
    let task = store.send(Action::HangEverywhere);
    assert_eq!(store.effect_count(), 4);

    task.cancel();
    timeout(Duration::from_secs(1), task.finish()).await.unwrap();
    assert_eq!(store.effect_count(), 0);
    assert!(task.is_cancelled());
}

#[tokio::test]
async fn test_cancel_leaves_other_sends_alone() {
    let store = Store::new(Timer::default(), timer);
    let first = store.send(Action::Hang);
    let second = store.send(Action::Hang);
    assert_eq!(store.effect_count(), 2);

    first.cancel();
    timeout(Duration::from_secs(1), first.finish()).await.unwrap();
    assert_eq!(store.effect_count(), 1);
    assert!(!second.is_finished());

    second.cancel();
    timeout(Duration::from_secs(1), second.finish()).await.unwrap();
    assert_eq!(store.effect_count(), 0);
}

#[tokio::test]
async fn test_cancel_in_flight_and_cancel_by_id() {
    let store = Store::new(Timer::default(), timer);
    store.send(Action::StartTimer);
    store.send(Action::StartTimer);
    wait_for_effects(&store, 1).await;

    timeout(Duration::from_secs(1), async {
        while store.state().ticks < 3 {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    store.send(Action::StopTimer);
    wait_for_effects(&store, 0).await;

    let ticks = store.state().ticks;
    sleep(Duration::from_millis(30)).await;
    assert_eq!(store.state().ticks, ticks);
}

#[tokio::test]
async fn test_cancel_effects_from_outside() {
    let store = Store::new(Timer::default(), timer);
    let task = store.send(Action::StartTimer);
    assert_eq!(store.cancel_effects(TimerId), 1);

    timeout(Duration::from_secs(1), task.finish()).await.unwrap();
    assert_eq!(store.effect_count(), 0);
    assert_eq!(store.cancel_effects(TimerId), 0);
}

#[tokio::test]
async fn test_debounce_keeps_last() {
    let store = Store::new(Timer::default(), timer);
    store.send(Action::Search("r".into()));
    store.send(Action::Search("ru".into()));
    let last = store.send(Action::Search("rust".into()));

    timeout(Duration::from_secs(1), last.finish()).await.unwrap();
    wait_for_effects(&store, 0).await;

    let state = store.state();
    assert_eq!(state.query, "rust");
    assert_eq!(state.results, vec!["rust"]);
}

#[tokio::test]
async fn test_concatenate_waits_for_async_portion() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let reducer_log = Arc::clone(&log);
    let store = Store::new((), move |_: &mut (), _: Action| {
        let first = Arc::clone(&reducer_log);
        let second = Arc::clone(&reducer_log);
        Effect::run(move |_| async move {
            first.lock().push("task1:start");
            sleep(Duration::from_millis(20)).await;
            first.lock().push("task1:end");
        })
        .concatenate(Effect::run(move |_| async move {
            second.lock().push("task2:start");
        }))
    });

    let task = store.send(Action::Chain);
    timeout(Duration::from_secs(1), task.finish()).await.unwrap();
    assert_eq!(*log.lock(), vec!["task1:start", "task1:end", "task2:start"]);
}

#[tokio::test]
async fn test_synchronous_then_async_concatenation() {
    let store = Store::new(Timer::default(), timer);
    let task = store.send(Action::Chain);

    timeout(Duration::from_secs(1), task.finish()).await.unwrap();
    assert_eq!(store.state().ticks, 2);
}

#[tokio::test]
async fn test_background_priority_runs() {
    let store = Store::new(Timer::default(), timer);
    let task = store.send(Action::Background);

    timeout(Duration::from_secs(1), task.finish()).await.unwrap();
    assert_eq!(store.state().ticks, 1);
}

#[tokio::test]
async fn test_unhandled_failure_is_diagnosed() {
    let store = Store::new(Timer::default(), timer);
    let task = store.send(Action::Fail);

    timeout(Duration::from_secs(1), task.finish()).await.unwrap();
    let diagnostics = store.take_diagnostics();
    assert!(matches!(
        diagnostics.as_slice(),
        [Diagnostic::UnhandledEffectError { error, .. }] if error == "connection reset"
    ));
    assert!(store.diagnostics().is_empty());
}

#[tokio::test]
async fn test_dropping_store_cancels_effects() {
    let (signal_tx, signal_rx) = oneshot::channel::<()>();
    let signal = Arc::new(Mutex::new(Some(signal_tx)));
    let store = Store::new((), move |_: &mut (), _: Action| {
        let held = signal.lock().take();
        Effect::run(move |_| async move {
            let _held = held;
            pending::<()>().await
        })
    });

    store.send(Action::Hang);
    drop(store);

    // The sender is dropped along with the cancelled effect
    let result = timeout(Duration::from_secs(1), signal_rx).await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_dropping_cancellable_finish_cancels_work() {
    let store = Store::new(Timer::default(), timer);
    let task = store.send(Action::Hang);

    let waited = timeout(Duration::from_millis(10), task.cancellable_finish()).await;
    assert!(waited.is_err());
    assert!(task.is_cancelled());
    wait_for_effects(&store, 0).await;
}

#[derive(Debug)]
enum Tap {
    Press(u32),
    Emitted(u32),
}

fn throttled_taps(
    interval: Duration,
    latest: bool,
) -> impl Fn(&mut Vec<u32>, Tap) -> Effect<Tap> + Send + Sync + 'static {
    move |log: &mut Vec<u32>, tap: Tap| match tap {
        Tap::Press(n) => Effect::send(Tap::Emitted(n)).throttle("taps", interval, latest),
        Tap::Emitted(n) => {
            log.push(n);
            Effect::none()
        }
    }
}

async fn press_burst(store: &Store<Vec<u32>, Tap>) {
    store.send(Tap::Press(1)).finish().await;
    let mut last = None;
    for n in 2..=5 {
        last = Some(store.send(Tap::Press(n)));
        sleep(Duration::from_millis(5)).await;
    }
    if let Some(task) = last {
        timeout(Duration::from_secs(2), task.finish()).await.unwrap();
    }
}

#[tokio::test]
async fn test_throttle_latest_emits_newest() {
    let store = Store::new(Vec::new(), throttled_taps(Duration::from_millis(200), true));
    press_burst(&store).await;

    assert_eq!(store.state(), vec![1, 5]);
}

#[tokio::test]
async fn test_throttle_first_emits_oldest() {
    let store = Store::new(Vec::new(), throttled_taps(Duration::from_millis(200), false));
    press_burst(&store).await;

    assert_eq!(store.state(), vec![1, 2]);
}

#[tokio::test]
async fn test_throttle_passes_after_interval() {
    let store = Store::new(Vec::new(), throttled_taps(Duration::from_millis(20), true));
    store.send(Tap::Press(1)).finish().await;
    sleep(Duration::from_millis(50)).await;
    timeout(Duration::from_secs(1), store.send(Tap::Press(2)).finish())
        .await
        .unwrap();

    assert_eq!(store.state(), vec![1, 2]);
}

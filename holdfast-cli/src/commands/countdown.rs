//! Countdown demo: a cancellable stream effect observed through commits.

use anyhow::Result;
use futures::stream;
use holdfast::{Effect, Store, StoreConfig};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone, Default)]
struct Countdown {
    remaining: u64,
    running: bool,
    stopped: bool,
}

#[derive(Debug)]
enum CountdownAction {
    Start { from: u64, interval: Duration },
    Tick,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TimerId;

fn countdown(state: &mut Countdown, action: CountdownAction) -> Effect<CountdownAction> {
    match action {
        CountdownAction::Start { from, interval } => {
            state.remaining = from;
            state.running = from > 0;
            state.stopped = false;
            let ticks = stream::unfold(from, move |left| async move {
                if left == 0 {
                    return None;
                }
                tokio::time::sleep(interval).await;
                Some((CountdownAction::Tick, left - 1))
            });
            Effect::stream(ticks).cancellable(TimerId, true)
        }
        CountdownAction::Tick => {
            state.remaining = state.remaining.saturating_sub(1);
            state.running = state.remaining > 0;
            Effect::none()
        }
        CountdownAction::Stop => {
            if state.running {
                state.running = false;
                state.stopped = true;
            }
            Effect::cancel(TimerId)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CountdownOptions {
    pub from: u64,
    pub interval_ms: u64,
    pub stop_after: Option<u64>,
}

pub async fn run_countdown(config: StoreConfig, opts: CountdownOptions) -> Result<()> {
    let store = Store::builder(Countdown::default(), countdown).config(config).build();
    let mut changes = store.changes();

    let task = store.send(CountdownAction::Start {
        from: opts.from,
        interval: Duration::from_millis(opts.interval_ms),
    });

    loop {
        match changes.recv().await {
            Ok(version) => {
                let state = store.state();
                println!("[{version}] remaining: {}", state.remaining);
                if !state.running {
                    break;
                }
                let elapsed = opts.from - state.remaining;
                if opts.stop_after.is_some_and(|limit| elapsed >= limit) {
                    store.send(CountdownAction::Stop);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed countdown updates");
            }
            Err(RecvError::Closed) => break,
        }
    }
    task.finish().await;

    let state = store.state();
    if state.stopped {
        println!("stopped with {} remaining", state.remaining);
    } else {
        println!("liftoff");
    }
    super::print_diagnostics(&store.diagnostics());
    Ok(())
}

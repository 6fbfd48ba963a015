//! Counter demo: synchronous mutation plus a task effect per action.

use anyhow::Result;
use futures::future::join_all;
use holdfast::{Effect, Store, StoreConfig};

#[derive(Debug, Clone, Default)]
struct Counter {
    count: u64,
    ticks: u64,
}

#[derive(Debug)]
enum CounterAction {
    Increment,
    Tick,
}

fn counter(state: &mut Counter, action: CounterAction) -> Effect<CounterAction> {
    match action {
        CounterAction::Increment => {
            state.count += 1;
            Effect::run(|send| async move { send.send(CounterAction::Tick) })
        }
        CounterAction::Tick => {
            state.ticks += 1;
            Effect::none()
        }
    }
}

pub async fn run_counter(config: StoreConfig, times: u64) -> Result<()> {
    let store = Store::builder(Counter::default(), counter).config(config).build();

    let tasks: Vec<_> = (0..times).map(|_| store.send(CounterAction::Increment)).collect();
    join_all(tasks.iter().map(|task| task.finish())).await;

    let state = store.state();
    tracing::debug!(version = store.version(), "counter finished");
    println!("count: {}", state.count);
    println!("ticks: {}", state.ticks);
    println!("live effects: {}", store.effect_count());
    super::print_diagnostics(&store.diagnostics());
    Ok(())
}

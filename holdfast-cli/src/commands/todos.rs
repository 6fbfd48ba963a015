//! Todos demo: keyed collection scopes and invalidation.

use anyhow::{ensure, Result};
use holdfast::{Effect, ScopeId, Store, StoreConfig};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Todo {
    title: String,
    done: bool,
}

#[derive(Debug, Clone, Default)]
struct Todos {
    items: BTreeMap<u64, Todo>,
}

#[derive(Debug)]
enum TodoAction {
    Toggle,
}

#[derive(Debug)]
enum TodosAction {
    Add(u64, String),
    Remove(u64),
    Todo(u64, TodoAction),
}

fn todos(state: &mut Todos, action: TodosAction) -> Effect<TodosAction> {
    match action {
        TodosAction::Add(id, title) => {
            state.items.insert(id, Todo { title, done: false });
        }
        TodosAction::Remove(id) => {
            state.items.remove(&id);
        }
        TodosAction::Todo(id, TodoAction::Toggle) => {
            if let Some(todo) = state.items.get_mut(&id) {
                todo.done = !todo.done;
            }
        }
    }
    Effect::none()
}

fn rows(store: &Store<Todos, TodosAction>, ids: impl IntoIterator<Item = u64>) -> Vec<(u64, Store<Todo, TodoAction>)> {
    let ids: Vec<u64> = ids.into_iter().collect();
    let scopes = store.scope_each(
        ScopeId::new("items", "todo"),
        ids.clone(),
        |todos, id| todos.items.get(id),
        TodosAction::Todo,
    );
    let present = ids.into_iter().filter(|id| store.with_state(|todos| todos.items.contains_key(id)));
    present.zip(scopes).collect()
}

fn print_row(id: u64, row: &Store<Todo, TodoAction>) {
    let todo = row.state();
    let mark = if todo.done { "x" } else { " " };
    let status = if row.is_invalid() { "invalid" } else { "valid" };
    println!("#{id} [{mark}] {} ({status})", todo.title);
}

pub fn run_todos(config: StoreConfig, count: u64, remove: u64) -> Result<()> {
    ensure!(
        (1..=count).contains(&remove),
        "--remove must name one of the {count} todos"
    );

    let store = Store::builder(Todos::default(), todos).config(config).build();
    for id in 1..=count {
        store.send(TodosAction::Add(id, format!("todo {id}")));
    }

    let before = rows(&store, 1..=count);
    for (id, row) in &before {
        if id % 2 == 0 {
            row.send(TodoAction::Toggle);
        }
    }
    println!("before removing #{remove}:");
    for (id, row) in &before {
        print_row(*id, row);
    }

    store.send(TodosAction::Remove(remove));
    println!("after removing #{remove}:");
    for (id, row) in &before {
        print_row(*id, row);
    }

    if let Some((_, removed)) = before.iter().find(|(id, _)| *id == remove) {
        removed.send(TodoAction::Toggle);
    }

    let after = rows(&store, 1..=count);
    let reused = after
        .iter()
        .filter(|(id, row)| before.iter().any(|(old, kept)| old == id && kept.ptr_eq(row)))
        .count();
    println!("rederived {} scopes, {reused} reused from cache", after.len());
    println!("cached scopes: {}", store.cached_children());

    super::print_diagnostics(&store.diagnostics());
    Ok(())
}

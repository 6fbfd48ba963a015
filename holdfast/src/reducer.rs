//! The transition function driving a store

use crate::effect::Effect;

/// Business logic of a store
///
/// `reduce` mutates the state in place for one action and returns the
/// effects to run afterwards. It is called only from the store's dispatch
/// loop, one action at a time, and must not block.
///
/// Any `Fn(&mut S, A) -> Effect<A>` closure is a reducer.
pub trait Reducer<S, A>: Send + Sync + 'static {
    fn reduce(&self, state: &mut S, action: A) -> Effect<A>;
}

impl<S, A, F> Reducer<S, A> for F
where
    F: Fn(&mut S, A) -> Effect<A> + Send + Sync + 'static,
{
    fn reduce(&self, state: &mut S, action: A) -> Effect<A> {
        self(state, action)
    }
}

//! Per-key emission gates for [`Effect::throttle`](super::Effect::throttle)

use crate::types::CancelId;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Gate {
    last: Instant,
    pending: Option<Box<dyn Any + Send>>,
}

/// Outcome of offering an action to a throttle gate
#[derive(Debug)]
pub(crate) enum Admission<A> {
    /// Emit this action now
    Now(A),
    /// The value is parked until the deadline; collect it with [`Throttles::release`]
    At(Instant),
}

/// Last emission time and parked value for every throttled key of a store
#[derive(Default)]
pub(crate) struct Throttles {
    gates: Mutex<HashMap<CancelId, Gate>>,
}

impl Throttles {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Offer `action` to the gate for `key`
    ///
    /// The first action for a key always passes. Afterwards the parked
    /// value is the newest action when `latest` is set, otherwise the
    /// oldest action not yet emitted.
    pub(crate) fn admit<A: Send + 'static>(
        &self,
        key: &CancelId,
        action: A,
        interval: Duration,
        latest: bool,
    ) -> Admission<A> {
        let now = Instant::now();
        let mut gates = self.gates.lock();
        let Some(gate) = gates.get_mut(key) else {
            gates.insert(key.clone(), Gate { last: now, pending: None });
            return Admission::Now(action);
        };

        let value = match gate.pending.take() {
            Some(parked) if !latest => match parked.downcast::<A>() {
                Ok(parked) => *parked,
                Err(_) => {
                    tracing::warn!(key = ?key, "throttle key reused with another action type");
                    action
                }
            },
            _ => action,
        };

        let deadline = gate.last + interval;
        if now >= deadline {
            gate.last = now;
            return Admission::Now(value);
        }
        gate.pending = Some(Box::new(value));
        Admission::At(deadline)
    }

    /// Take the parked value for `key`, marking it emitted now
    pub(crate) fn release<A: 'static>(&self, key: &CancelId) -> Option<A> {
        let mut gates = self.gates.lock();
        let gate = gates.get_mut(key)?;
        let parked = gate.pending.take()?;
        gate.last = Instant::now();
        parked.downcast::<A>().ok().map(|value| *value)
    }

    #[cfg(test)]
    fn is_parked(&self, key: &CancelId) -> bool {
        self.gates
            .lock()
            .get(key)
            .is_some_and(|gate| gate.pending.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(60);

    fn parked_at<A>(admission: Admission<A>) -> Instant {
        match admission {
            Admission::At(deadline) => deadline,
            Admission::Now(_) => panic!("expected the value to be parked"),
        }
    }

    #[tokio::test]
    async fn test_first_action_passes() {
        let throttles = Throttles::new();
        let key = CancelId::new("search");
        assert!(matches!(throttles.admit(&key, 1u32, INTERVAL, true), Admission::Now(1)));
        assert!(!throttles.is_parked(&key));
    }

    #[tokio::test]
    async fn test_latest_parks_newest() {
        let throttles = Throttles::new();
        let key = CancelId::new("search");
        let _ = throttles.admit(&key, 1u32, INTERVAL, true);
        let first = parked_at(throttles.admit(&key, 2u32, INTERVAL, true));
        let second = parked_at(throttles.admit(&key, 3u32, INTERVAL, true));

        assert_eq!(first, second);
        assert_eq!(throttles.release::<u32>(&key), Some(3));
        assert_eq!(throttles.release::<u32>(&key), None);
    }

    #[tokio::test]
    async fn test_first_keeps_oldest_parked() {
        let throttles = Throttles::new();
        let key = CancelId::new("search");
        let _ = throttles.admit(&key, 1u32, INTERVAL, false);
        let _ = parked_at(throttles.admit(&key, 2u32, INTERVAL, false));
        let _ = parked_at(throttles.admit(&key, 3u32, INTERVAL, false));

        assert_eq!(throttles.release::<u32>(&key), Some(2));
    }

    #[tokio::test]
    async fn test_elapsed_interval_passes() {
        let throttles = Throttles::new();
        let key = CancelId::new("search");
        let _ = throttles.admit(&key, 1u32, Duration::ZERO, true);
        assert!(matches!(throttles.admit(&key, 2u32, Duration::ZERO, true), Admission::Now(2)));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let throttles = Throttles::new();
        let _ = throttles.admit(&CancelId::new("a"), 1u32, INTERVAL, true);
        assert!(matches!(
            throttles.admit(&CancelId::new("b"), 2u32, INTERVAL, true),
            Admission::Now(2)
        ));
    }
}

//! Tick-level batching of observer flushes.
//!
//! The first write an observer sees after a flush queues it here; nothing
//! else is queued until that flush runs. A tick drains the queue as it
//! stood when the tick started, so writes made by callbacks during a tick
//! are delivered on the next one.

use crate::error::Result;
use crate::observer::{Callback, Observer};
use crate::protocol::{DebugUpdate, UpdateOfShared};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{trace, warn};

pub(crate) struct TickQueue {
    observers: RefCell<VecDeque<Observer>>,
    #[cfg(feature = "async")]
    notify: tokio::sync::Notify,
}

impl TickQueue {
    pub(crate) fn enqueue(&self, observer: Observer) {
        self.observers.borrow_mut().push_back(observer);
        #[cfg(feature = "async")]
        self.notify.notify_one();
    }
}

#[derive(Clone)]
pub struct CommitScheduler {
    queue: Rc<TickQueue>,
    ticks: Rc<Cell<u64>>,
}

impl CommitScheduler {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(TickQueue {
                observers: RefCell::new(VecDeque::new()),
                #[cfg(feature = "async")]
                notify: tokio::sync::Notify::new(),
            }),
            ticks: Rc::new(Cell::new(0)),
        }
    }

    pub fn observer<F>(&self, callback: F) -> Observer
    where
        F: FnMut(&UpdateOfShared, &DebugUpdate) -> Result<()> + 'static,
    {
        let callback: Callback = Box::new(callback);
        Observer::new(Rc::downgrade(&self.queue), callback)
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.observers.borrow().is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.observers.borrow().len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    /// Runs one scheduling turn and returns how many observers received a
    /// flush. A failing callback does not stop the others; the first error
    /// is returned once the tick is over.
    pub fn run_tick(&self) -> Result<usize> {
        let batch = std::mem::take(&mut *self.queue.observers.borrow_mut());
        let mut flushed = 0;
        let mut first_error = None;

        for observer in batch {
            if !observer.is_waiting_commit() {
                continue;
            }
            match observer.commit() {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(observer = observer.id(), error = %e, "flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.ticks.set(self.ticks.get() + 1);
        trace!(tick = self.ticks.get(), flushed, "tick complete");

        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Runs ticks until nothing is queued or `max_ticks` ran.
    pub fn run_until_idle(&self, max_ticks: usize) -> Result<usize> {
        let mut flushed = 0;
        for _ in 0..max_ticks {
            if !self.has_pending() {
                break;
            }
            flushed += self.run_tick()?;
        }
        Ok(flushed)
    }
}

#[cfg(feature = "async")]
impl CommitScheduler {
    /// Waits for a write, yields once so the current burst of synchronous
    /// writes can finish, then runs a tick.
    pub async fn next_tick(&self) -> Result<usize> {
        if !self.has_pending() {
            self.queue.notify.notified().await;
        }
        tokio::task::yield_now().await;
        self.run_tick()
    }

    /// Flushes forever. Spawn on a `tokio::task::LocalSet`.
    pub async fn drive(self) {
        loop {
            if let Err(e) = self.next_tick().await {
                warn!(error = %e, "scheduled flush failed");
            }
        }
    }
}

impl Default for CommitScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistry;
    use crate::share::share;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .define_schema_json("Counter", &json!({ "value": "number" }))
            .unwrap();
        registry.assign_identities().unwrap();
        registry
    }

    #[test]
    fn test_one_enqueue_per_observer_per_tick() {
        let registry = registry();
        let scheduler = CommitScheduler::new();
        let observer = scheduler.observer(|_, _| Ok(()));
        let a = registry.instantiate("Counter").unwrap();
        let b = registry.instantiate("Counter").unwrap();
        share(&registry, &a, &observer).unwrap();
        share(&registry, &b, &observer).unwrap();

        a.set(&registry, "value", 1.0).unwrap();
        b.set(&registry, "value", 1.0).unwrap();
        a.set(&registry, "value", 2.0).unwrap();
        assert_eq!(scheduler.queued(), 1);

        assert_eq!(scheduler.run_tick().unwrap(), 1);
        assert!(!scheduler.has_pending());
        assert_eq!(scheduler.ticks(), 1);
    }

    #[test]
    fn test_writes_from_callback_land_next_tick() {
        let registry = registry();
        let scheduler = CommitScheduler::new();
        let counter = registry.instantiate("Counter").unwrap();

        let echo = counter.clone();
        let echo_registry = registry.clone();
        let deliveries = Rc::new(Cell::new(0));
        let seen = Rc::clone(&deliveries);
        let observer = scheduler.observer(move |_, debug| {
            seen.set(seen.get() + 1);
            let value = debug.set[0].fields().get("value").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if value < 3.0 {
                echo.set(&echo_registry, "value", value + 1.0)?;
            }
            Ok(())
        });
        share(&registry, &counter, &observer).unwrap();

        counter.set(&registry, "value", 1.0).unwrap();
        assert_eq!(scheduler.run_tick().unwrap(), 1);
        assert_eq!(deliveries.get(), 1);
        assert!(scheduler.has_pending());

        assert_eq!(scheduler.run_until_idle(10).unwrap(), 2);
        assert_eq!(deliveries.get(), 3);
        assert_eq!(counter.get("value").unwrap().as_f64(), Some(3.0));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_next_tick_flushes_after_yield() {
        let registry = registry();
        let scheduler = CommitScheduler::new();
        let deliveries = Rc::new(Cell::new(0));
        let seen = Rc::clone(&deliveries);
        let observer = scheduler.observer(move |_, _| {
            seen.set(seen.get() + 1);
            Ok(())
        });
        let counter = registry.instantiate("Counter").unwrap();
        share(&registry, &counter, &observer).unwrap();

        counter.set(&registry, "value", 1.0).unwrap();
        counter.set(&registry, "value", 2.0).unwrap();

        assert_eq!(scheduler.next_tick().await.unwrap(), 1);
        assert_eq!(deliveries.get(), 1);
    }
}

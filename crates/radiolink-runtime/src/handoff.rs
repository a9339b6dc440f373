//! Interrupt-to-loop handoff.
//!
//! Hardware completions arrive outside the event loop. They store their result in a
//! [`HandoffCell`] and schedule a loop action with `replace`; the action takes the value
//! and runs the component logic. Rapid bursts collapse to the latest value and a single
//! pending firing.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::scheduler::{ActionId, SchedulerHandle};

/// Single-slot, latest-wins cell shared between contexts.
pub struct HandoffCell<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for HandoffCell<T> {
    fn clone(&self) -> Self {
        Self { slot: self.slot.clone() }
    }
}

impl<T> Default for HandoffCell<T> {
    fn default() -> Self {
        Self { slot: Arc::new(Mutex::new(None)) }
    }
}

impl<T> HandoffCell<T> {
    /// Creates an empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the value it overwrote.
    pub fn put(&self, value: T) -> Option<T> {
        self.lock().replace(value)
    }

    /// Takes the stored value.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for HandoffCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffCell").field("occupied", &!self.is_empty()).finish()
    }
}

/// A handoff cell paired with the loop action that consumes it.
pub struct Deferred<T> {
    cell: HandoffCell<T>,
    scheduler: SchedulerHandle,
    action: ActionId,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone(), scheduler: self.scheduler.clone(), action: self.action }
    }
}

impl<T> Deferred<T> {
    /// Pairs a new cell with `action`.
    pub fn new(scheduler: SchedulerHandle, action: ActionId) -> Self {
        Self { cell: HandoffCell::new(), scheduler, action }
    }

    /// Stores `value` and schedules the consuming action immediately.
    ///
    /// Returns the value that was still waiting, if any.
    pub fn post(&self, value: T) -> Option<T> {
        let overwritten = self.cell.put(value);
        self.scheduler.replace(self.action, Duration::ZERO);
        overwritten
    }

    /// Takes the posted value; called from the consuming action.
    pub fn take(&self) -> Option<T> {
        self.cell.take()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("cell", &self.cell).field("action", &self.action).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{scheduler::Scheduler, time::ManualClock};

    #[test]
    fn test_latest_value_wins() {
        let cell = HandoffCell::new();
        assert_eq!(cell.put(1), None);
        assert_eq!(cell.put(2), Some(1));
        assert_eq!(cell.take(), Some(2));
        assert!(cell.is_empty());
    }

    #[test]
    fn test_deferred_runs_in_loop_once() {
        let mut scheduler = Scheduler::new(Arc::new(ManualClock::new()));
        let action = scheduler.action("consume");
        let deferred = Deferred::new(scheduler.handle(), action);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let consumer = deferred.clone();
        let sink = seen.clone();
        scheduler.bind(action, move || {
            while let Some(value) = consumer.take() {
                sink.borrow_mut().push(value);
            }
        });

        let irq = deferred.clone();
        std::thread::spawn(move || {
            irq.post(1u8);
            irq.post(2u8);
        })
        .join()
        .unwrap();

        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(*seen.borrow(), vec![2]);
    }
}

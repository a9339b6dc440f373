//! Delayed actions for the cooperative event loop.
//!
//! An action is a named callback owned by the loop. It can be pending at most once:
//! [`SchedulerHandle::add`] leaves an already pending firing alone while
//! [`SchedulerHandle::replace`] moves it. Handles are `Send + Sync`, so interrupt-side
//! code can defer work to the loop; callbacks themselves only ever run inside
//! [`Scheduler::run_pending`].

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    rc::Rc,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::trace;

use crate::time::Clock;

/// Identity of a schedulable action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(usize);

/// Pending firings ordered by deadline, then by scheduling order.
#[derive(Debug, Default)]
struct Timeline {
    queue: BTreeMap<(Instant, u64), ActionId>,
    pending: HashMap<ActionId, (Instant, u64)>,
    next_order: u64,
}

impl Timeline {
    fn schedule(&mut self, action: ActionId, at: Instant) {
        let key = (at, self.next_order);
        self.next_order += 1;
        self.queue.insert(key, action);
        self.pending.insert(action, key);
    }

    fn cancel(&mut self, action: ActionId) {
        if let Some(key) = self.pending.remove(&action) {
            self.queue.remove(&key);
        }
    }

    fn pop_due(&mut self, now: Instant) -> Option<ActionId> {
        let (&key, &action) = self.queue.first_key_value()?;
        if key.0 > now {
            return None;
        }
        self.queue.remove(&key);
        self.pending.remove(&action);
        Some(action)
    }
}

/// Thread-safe handle for scheduling actions.
#[derive(Clone)]
pub struct SchedulerHandle {
    timeline: Arc<Mutex<Timeline>>,
    clock: Arc<dyn Clock>,
}

impl SchedulerHandle {
    /// Schedules `action` to fire `delay` from now, unless it is already pending.
    pub fn add(&self, action: ActionId, delay: Duration) {
        let at = self.clock.now() + delay;
        let mut timeline = self.lock();
        if !timeline.pending.contains_key(&action) {
            timeline.schedule(action, at);
        }
    }

    /// Schedules `action` to fire `delay` from now, cancelling any pending firing.
    pub fn replace(&self, action: ActionId, delay: Duration) {
        let at = self.clock.now() + delay;
        let mut timeline = self.lock();
        timeline.cancel(action);
        timeline.schedule(action, at);
    }

    /// Returns true if `action` is waiting to fire.
    pub fn is_pending(&self, action: ActionId) -> bool {
        self.lock().pending.contains_key(&action)
    }

    /// Deadline of the pending firing of `action`.
    pub fn deadline(&self, action: ActionId) -> Option<Instant> {
        self.lock().pending.get(&action).map(|key| key.0)
    }

    /// Current time of the scheduler's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle").field("pending", &self.lock().pending.len()).finish()
    }
}

struct ActionSlot {
    name: &'static str,
    callback: Option<Rc<dyn Fn()>>,
}

/// Owns the action callbacks and fires them from loop context.
pub struct Scheduler {
    handle: SchedulerHandle,
    actions: Vec<ActionSlot>,
}

impl Scheduler {
    /// Creates a scheduler reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            handle: SchedulerHandle { timeline: Arc::new(Mutex::new(Timeline::default())), clock },
            actions: Vec::new(),
        }
    }

    /// Returns a handle for scheduling actions.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Allocates an action whose callback is bound later with [`Scheduler::bind`].
    pub fn action(&mut self, name: &'static str) -> ActionId {
        self.actions.push(ActionSlot { name, callback: None });
        ActionId(self.actions.len() - 1)
    }

    /// Binds the callback of an allocated action.
    pub fn bind(&mut self, action: ActionId, callback: impl Fn() + 'static) {
        let slot = &mut self.actions[action.0];
        assert!(slot.callback.is_none(), "action '{}' bound twice", slot.name);
        slot.callback = Some(Rc::new(callback));
    }

    /// Allocates and binds an action in one step.
    pub fn register(&mut self, name: &'static str, callback: impl Fn() + 'static) -> ActionId {
        let action = self.action(name);
        self.bind(action, callback);
        action
    }

    /// Name given to `action` when it was allocated.
    pub fn name(&self, action: ActionId) -> &'static str {
        self.actions[action.0].name
    }

    /// Fires every due action, including ones made due by the callbacks themselves.
    ///
    /// Returns the number of firings.
    pub fn run_pending(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.handle.now();
            let Some(action) = self.handle.lock().pop_due(now) else {
                break;
            };

            let slot = &self.actions[action.0];
            let callback = match &slot.callback {
                Some(callback) => callback.clone(),
                None => panic!("action '{}' fired without a callback", slot.name),
            };
            trace!("Firing action '{}'", slot.name);
            callback();
            fired += 1;
        }
        fired
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.handle.lock().queue.first_key_value().map(|(key, _)| key.0)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("actions", &self.actions.len())
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::time::ManualClock;

    fn scheduler() -> (Scheduler, ManualClock) {
        let clock = ManualClock::new();
        (Scheduler::new(Arc::new(clock.clone())), clock)
    }

    fn recorder(
        scheduler: &mut Scheduler,
        log: &Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
    ) -> ActionId {
        let log = log.clone();
        scheduler.register(name, move || log.borrow_mut().push(name))
    }

    #[test]
    fn test_fires_after_delay() {
        let (mut scheduler, clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        let tick = recorder(&mut scheduler, &log, "tick");
        let handle = scheduler.handle();

        handle.add(tick, Duration::from_millis(10));
        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::from_millis(10));
        assert_eq!(scheduler.run_pending(), 1);
        assert!(!handle.is_pending(tick));
        assert_eq!(*log.borrow(), vec!["tick"]);
    }

    #[test]
    fn test_add_is_noop_when_pending() {
        let (mut scheduler, clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        let tick = recorder(&mut scheduler, &log, "tick");
        let handle = scheduler.handle();

        handle.add(tick, Duration::from_millis(10));
        handle.add(tick, Duration::from_millis(1));
        clock.advance(Duration::from_millis(5));
        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::from_millis(5));
        assert_eq!(scheduler.run_pending(), 1);
    }

    #[test]
    fn test_replace_moves_pending_firing() {
        let (mut scheduler, clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        let tick = recorder(&mut scheduler, &log, "tick");
        let handle = scheduler.handle();

        handle.add(tick, Duration::from_millis(1));
        handle.replace(tick, Duration::from_millis(20));
        clock.advance(Duration::from_millis(10));
        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::from_millis(10));
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_burst_collapses_to_one_firing() {
        let (mut scheduler, _clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        let rx = recorder(&mut scheduler, &log, "rx");
        let handle = scheduler.handle();

        for _ in 0..5 {
            handle.replace(rx, Duration::ZERO);
        }
        assert_eq!(scheduler.run_pending(), 1);
    }

    #[test]
    fn test_deadline_then_fifo_order() {
        let (mut scheduler, clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = recorder(&mut scheduler, &log, "a");
        let b = recorder(&mut scheduler, &log, "b");
        let c = recorder(&mut scheduler, &log, "c");
        let handle = scheduler.handle();

        handle.add(c, Duration::from_millis(2));
        handle.add(b, Duration::from_millis(1));
        handle.add(a, Duration::from_millis(1));
        assert_eq!(scheduler.next_deadline(), Some(clock.now() + Duration::from_millis(1)));

        clock.advance(Duration::from_millis(2));
        scheduler.run_pending();
        assert_eq!(*log.borrow(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_callbacks_may_schedule_from_loop() {
        let (mut scheduler, _clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        let second = recorder(&mut scheduler, &log, "second");
        let handle = scheduler.handle();
        let first = scheduler.register("first", move || handle.add(second, Duration::ZERO));

        scheduler.handle().add(first, Duration::ZERO);
        assert_eq!(scheduler.run_pending(), 2);
        assert_eq!(*log.borrow(), vec!["second"]);
    }

    #[test]
    fn test_handle_is_usable_from_another_thread() {
        let (mut scheduler, _clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        let irq = recorder(&mut scheduler, &log, "irq");
        let handle = scheduler.handle();

        std::thread::spawn(move || handle.replace(irq, Duration::ZERO)).join().unwrap();
        assert_eq!(scheduler.run_pending(), 1);
    }

    #[test]
    #[should_panic(expected = "fired without a callback")]
    fn test_unbound_action_asserts() {
        let (mut scheduler, _clock) = scheduler();
        let orphan = scheduler.action("orphan");
        scheduler.handle().add(orphan, Duration::ZERO);
        scheduler.run_pending();
    }
}

//! Cooperative mutual exclusion over an exclusive hardware resource.
//!
//! The resource can only be reached through a [`Lease`]. Dropping the lease releases the
//! resource and, if someone is waiting, schedules the next grant on the event loop.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use tracing::trace;

use crate::scheduler::{ActionId, Scheduler, SchedulerHandle};

type Waiter<R> = Box<dyn FnOnce(Lease<R>)>;

struct ArbiterInner<R> {
    name: &'static str,
    resource: RefCell<R>,
    holder: Cell<Option<u64>>,
    next_token: Cell<u64>,
    waiters: RefCell<VecDeque<Waiter<R>>>,
    grant: RefCell<Option<(SchedulerHandle, ActionId)>>,
}

/// Guards a resource shared cooperatively between components.
pub struct Arbiter<R> {
    inner: Rc<ArbiterInner<R>>,
}

impl<R> Clone for Arbiter<R> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<R: 'static> Arbiter<R> {
    /// Wraps `resource`.
    pub fn new(name: &'static str, resource: R) -> Self {
        Self {
            inner: Rc::new(ArbiterInner {
                name,
                resource: RefCell::new(resource),
                holder: Cell::new(None),
                next_token: Cell::new(0),
                waiters: RefCell::new(VecDeque::new()),
                grant: RefCell::new(None),
            }),
        }
    }

    /// Registers the loop action that grants queued requests.
    ///
    /// Required before [`Arbiter::request`] is used.
    pub fn attach(&self, scheduler: &mut Scheduler) {
        let weak: Weak<ArbiterInner<R>> = Rc::downgrade(&self.inner);
        let action = scheduler.register("arbiter.grant", move || {
            if let Some(inner) = weak.upgrade() {
                Arbiter { inner }.grant_next();
            }
        });
        *self.inner.grant.borrow_mut() = Some((scheduler.handle(), action));
    }

    /// Takes the resource if nobody holds it and nobody is queued for it.
    pub fn try_acquire(&self) -> Option<Lease<R>> {
        if self.is_busy() || !self.inner.waiters.borrow().is_empty() {
            return None;
        }
        Some(self.lease())
    }

    /// Queues `on_granted`, which runs from loop context once the resource is free.
    pub fn request(&self, on_granted: impl FnOnce(Lease<R>) + 'static) {
        self.inner.waiters.borrow_mut().push_back(Box::new(on_granted));
        if !self.is_busy() {
            self.schedule_grant();
        }
    }

    /// Returns true while a lease is alive.
    pub fn is_busy(&self) -> bool {
        self.inner.holder.get().is_some()
    }

    fn lease(&self) -> Lease<R> {
        let token = self.inner.next_token.get();
        self.inner.next_token.set(token.wrapping_add(1));
        self.inner.holder.set(Some(token));
        trace!("Arbiter '{}' granted lease {}", self.inner.name, token);
        Lease { inner: self.inner.clone(), token }
    }

    fn grant_next(&self) {
        if self.is_busy() {
            return;
        }
        let waiter = self.inner.waiters.borrow_mut().pop_front();
        if let Some(waiter) = waiter {
            waiter(self.lease());
        }
    }

    fn schedule_grant(&self) {
        match &*self.inner.grant.borrow() {
            Some((handle, action)) => handle.add(*action, Duration::ZERO),
            None => panic!("arbiter '{}' has queued requests but no scheduler", self.inner.name),
        }
    }
}

impl<R> fmt::Debug for Arbiter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arbiter")
            .field("name", &self.inner.name)
            .field("holder", &self.inner.holder.get())
            .field("waiters", &self.inner.waiters.borrow().len())
            .finish()
    }
}

/// Proof of exclusive access to an arbitrated resource.
pub struct Lease<R> {
    inner: Rc<ArbiterInner<R>>,
    token: u64,
}

impl<R> Lease<R> {
    /// Runs `f` against the resource.
    pub fn with<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        assert_eq!(
            self.inner.holder.get(),
            Some(self.token),
            "arbiter '{}' resource used outside its lease",
            self.inner.name
        );
        f(&mut self.inner.resource.borrow_mut())
    }
}

impl<R> Drop for Lease<R> {
    fn drop(&mut self) {
        assert_eq!(
            self.inner.holder.get(),
            Some(self.token),
            "arbiter '{}' released twice",
            self.inner.name
        );
        self.inner.holder.set(None);
        if !self.inner.waiters.borrow().is_empty() {
            if let Some((handle, action)) = &*self.inner.grant.borrow() {
                handle.add(*action, Duration::ZERO);
            }
        }
    }
}

impl<R> fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("arbiter", &self.inner.name).field("token", &self.token).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::time::ManualClock;

    #[test]
    fn test_try_acquire_is_exclusive() {
        let arbiter = Arbiter::new("radio", 0u32);
        let lease = arbiter.try_acquire().unwrap();
        assert!(arbiter.is_busy());
        assert!(arbiter.try_acquire().is_none());

        lease.with(|counter| *counter += 1);
        drop(lease);
        assert!(!arbiter.is_busy());
        assert_eq!(arbiter.try_acquire().unwrap().with(|counter| *counter), 1);
    }

    #[test]
    fn test_request_granted_from_loop_after_release() {
        let mut scheduler = Scheduler::new(Arc::new(ManualClock::new()));
        let arbiter = Arbiter::new("radio", Vec::<&str>::new());
        arbiter.attach(&mut scheduler);

        let lease = arbiter.try_acquire().unwrap();
        arbiter.request(|lease| lease.with(|log| log.push("waiter")));
        scheduler.run_pending();
        // still held, nothing granted
        assert!(arbiter.is_busy());

        drop(lease);
        scheduler.run_pending();
        assert!(!arbiter.is_busy());
        assert_eq!(arbiter.try_acquire().unwrap().with(|log| log.clone()), vec!["waiter"]);
    }

    #[test]
    fn test_waiters_block_try_acquire() {
        let mut scheduler = Scheduler::new(Arc::new(ManualClock::new()));
        let arbiter = Arbiter::new("aes", ());
        arbiter.attach(&mut scheduler);

        arbiter.request(|_lease| {});
        assert!(arbiter.try_acquire().is_none());
        scheduler.run_pending();
        assert!(arbiter.try_acquire().is_some());
    }

    #[test]
    #[should_panic(expected = "no scheduler")]
    fn test_request_without_scheduler_asserts() {
        let arbiter = Arbiter::new("radio", ());
        arbiter.request(|_lease| {});
    }
}

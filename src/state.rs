//! The state word and waiter-queue head shared by every synchronization primitive.
//!
//! The state is a single `u32`:
//!
//! - `HAS_WAITERS`: the waiter queue is non-empty. Only written with `QUEUE_LOCKED` held,
//!   readable without any lock.
//! - `QUEUE_LOCKED`: a spinlock bit guarding the waiter queue head. Never held across a park.
//! - `IS_LOCKED`: the mutex itself is held. Unused by the condition variable.

use crate::waiter_queue::{self, WaiterQueueNode};
use core::{
    cell::UnsafeCell,
    ptr,
    sync::atomic::{AtomicU32, Ordering},
};
use crossbeam_utils::Backoff;

pub(crate) type StateT = u32;

pub(crate) const HAS_WAITERS: StateT = 1 << 0;
pub(crate) const QUEUE_LOCKED: StateT = 1 << 1;
pub(crate) const IS_LOCKED: StateT = 1 << 2;

pub(crate) struct SyncPrimitive {
    state: AtomicU32,
    head: UnsafeCell<*const WaiterQueueNode>,
}

unsafe impl Send for SyncPrimitive {}
unsafe impl Sync for SyncPrimitive {}

impl SyncPrimitive {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            head: UnsafeCell::new(ptr::null()),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> &AtomicU32 {
        &self.state
    }

    #[inline]
    pub(crate) fn has_waiters(&self) -> bool {
        self.state.load(Ordering::Acquire) & HAS_WAITERS != 0
    }

    /// Spins until the queue lock bit is acquired.
    pub(crate) fn lock_waiter_queue(&self) -> WaiterQueueGuard<'_> {
        match self.lock_waiter_queue_if(|_| true) {
            Some(guard) => guard,
            None => unreachable!(),
        }
    }

    /// Spins for the queue lock bit for as long as `proceed` accepts the observed state.
    pub(crate) fn lock_waiter_queue_if(
        &self,
        mut proceed: impl FnMut(StateT) -> bool,
    ) -> Option<WaiterQueueGuard<'_>> {
        let backoff = Backoff::new();
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            if !proceed(state) {
                return None;
            }
            if state & QUEUE_LOCKED != 0 {
                backoff.snooze();
                state = self.state.load(Ordering::Relaxed);
                continue;
            }
            match self.state.compare_exchange_weak(
                state,
                state | QUEUE_LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(WaiterQueueGuard {
                        primitive: self,
                        released: false,
                    })
                }
                Err(s) => state = s,
            }
        }
    }
}

/// Proof that the queue lock bit is held; the only way to reach the waiter queue.
///
/// Dropping the guard releases the bit and syncs `HAS_WAITERS` with the queue.
pub(crate) struct WaiterQueueGuard<'a> {
    primitive: &'a SyncPrimitive,
    released: bool,
}

impl WaiterQueueGuard<'_> {
    #[inline]
    fn head(&mut self) -> &mut *const WaiterQueueNode {
        unsafe { &mut *self.primitive.head.get() }
    }

    /// # Safety
    ///
    /// `node` must stay alive and unmoved until it has been dequeued again.
    pub(crate) unsafe fn enqueue(&mut self, node: &WaiterQueueNode) {
        waiter_queue::enqueue(self.head(), node)
    }

    pub(crate) fn dequeue_head(&mut self) -> Option<*const WaiterQueueNode> {
        let node = unsafe { waiter_queue::dequeue_head(self.head()) };
        (!node.is_null()).then_some(node)
    }

    pub(crate) fn dequeue_matching(
        &mut self,
        matches: impl FnMut(&WaiterQueueNode) -> bool,
    ) -> Option<*const WaiterQueueNode> {
        let node = unsafe { waiter_queue::dequeue_matching(self.head(), matches) };
        (!node.is_null()).then_some(node)
    }

    /// Detaches every waiter, returning the detached list (possibly null).
    pub(crate) fn dequeue_all(&mut self) -> *const WaiterQueueNode {
        unsafe { waiter_queue::dequeue_all(self.head()) }
    }

    /// Detaches up to `count` waiters from the front, returning the detached list.
    pub(crate) fn dequeue_count(&mut self, count: u32) -> *const WaiterQueueNode {
        unsafe { waiter_queue::split(self.head(), count) }
    }

    pub(crate) fn len(&mut self) -> u32 {
        unsafe { waiter_queue::len(*self.head()) }
    }

    /// Releases the queue lock in a single CAS that also applies `update` to the other bits.
    /// Returns the state the CAS replaced, queue lock bit included.
    pub(crate) fn release_with(mut self, update: impl FnMut(StateT) -> StateT) -> StateT {
        self.released = true;
        self.release(update)
    }

    fn release(&mut self, mut update: impl FnMut(StateT) -> StateT) -> StateT {
        let has_waiters = !self.head().is_null();
        let state = &self.primitive.state;
        let mut current = state.load(Ordering::Relaxed);
        loop {
            debug_assert!(current & QUEUE_LOCKED != 0);
            let mut new = update(current) & !(QUEUE_LOCKED | HAS_WAITERS);
            if has_waiters {
                new |= HAS_WAITERS;
            }
            match state.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(old) => return old,
                Err(s) => current = s,
            }
        }
    }
}

impl Drop for WaiterQueueGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.release(|s| s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_holds_queue_bit() {
        let primitive = SyncPrimitive::new();
        let guard = primitive.lock_waiter_queue();
        assert_eq!(primitive.state().load(Ordering::Relaxed), QUEUE_LOCKED);
        drop(guard);
        assert_eq!(primitive.state().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn release_syncs_has_waiters() {
        let primitive = SyncPrimitive::new();
        let node = WaiterQueueNode::new();

        let mut guard = primitive.lock_waiter_queue();
        unsafe { guard.enqueue(&node) };
        drop(guard);
        assert!(primitive.has_waiters());

        let mut guard = primitive.lock_waiter_queue();
        assert_eq!(guard.len(), 1);
        assert!(guard.dequeue_head().is_some());
        drop(guard);
        assert!(!primitive.has_waiters());
        assert_eq!(primitive.state().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn release_with_applies_update() {
        let primitive = SyncPrimitive::new();
        primitive.state().store(IS_LOCKED, Ordering::Relaxed);

        let guard = primitive.lock_waiter_queue();
        let old = guard.release_with(|s| s & !IS_LOCKED);
        assert_eq!(old, IS_LOCKED | QUEUE_LOCKED);
        assert_eq!(primitive.state().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn lock_if_refuses_rejected_state() {
        let primitive = SyncPrimitive::new();
        assert!(primitive.lock_waiter_queue_if(|s| s & IS_LOCKED != 0).is_none());
        assert_eq!(primitive.state().load(Ordering::Relaxed), 0);

        primitive.state().store(IS_LOCKED, Ordering::Relaxed);
        let guard = primitive.lock_waiter_queue_if(|s| s & IS_LOCKED != 0);
        assert!(guard.is_some());
    }
}

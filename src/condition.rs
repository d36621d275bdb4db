use crate::mutex::{MutexGuard, RawMutex};
use crate::state::SyncPrimitive;
use crate::waiter_queue::{self, WaiterQueueNode};
use core::{ptr, time::Duration};
use log::{debug, trace};
use std::time::Instant;

/// Passed to [`Condition::notify`] to wake every queued waiter.
pub const ALL_WAITERS: u32 = u32::MAX;

/// A condition variable that manages its own queue of parked threads, like [`RawMutex`].
///
/// The state word only uses the `HAS_WAITERS` and `QUEUE_LOCKED` bits.
///
/// Waiting:
///  1. Take `QUEUE_LOCKED`, enqueue a node naming the mutex to reacquire, release
///     `QUEUE_LOCKED` setting `HAS_WAITERS` in the same CAS.
///  2. Unlock the mutex and park.
///  3. Relock the mutex.
///
/// Notifying:
///  1. Take `QUEUE_LOCKED`, detach up to `count` nodes from the front, release
///     `QUEUE_LOCKED` syncing `HAS_WAITERS`.
///  2. Notify every detached node.
///
/// Mutex state is never touched by a notifier; woken threads relock their own mutex.
pub struct Condition {
    primitive: SyncPrimitive,
}

impl Condition {
    pub const fn new() -> Self {
        Self {
            primitive: SyncPrimitive::new(),
        }
    }

    /// Releases `mutex`, waits to be notified for at most `timeout`, then relocks `mutex`.
    ///
    /// The calling thread must hold `mutex`. Returns true if woken by a notification and
    /// false on timeout. A notification that races with the timeout wins.
    pub fn wait_for(&self, mutex: &RawMutex, timeout: Option<Duration>) -> bool {
        self.wait_until(
            mutex,
            timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
        )
    }

    /// Like [`Condition::wait_for`] with an absolute deadline.
    pub fn wait_until(&self, mutex: &RawMutex, deadline: Option<Instant>) -> bool {
        debug_assert!(
            mutex.is_current_thread_owner(),
            "waiting on a condition with a mutex not held by the current thread"
        );

        let node = WaiterQueueNode::with_mutex(mutex);
        {
            let mut guard = self.primitive.lock_waiter_queue();
            unsafe { guard.enqueue(&node) };
        }

        unsafe { lock_api::RawMutex::unlock(mutex) };
        trace!("condition {:p}: parking", self);

        let mut notified = node.wait(deadline);
        if !notified {
            notified = self.dequeue_timed_out_waiter(&node);
        }
        node.reacquire_mutex();
        notified
    }

    /// Waits through a [`MutexGuard`] of a data-carrying [`Mutex`](crate::Mutex).
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>, timeout: Option<Duration>) -> bool {
        let mutex = unsafe { lock_api::MutexGuard::mutex(guard).raw() };
        self.wait_for(mutex, timeout)
    }

    /// Removes a timed-out waiter. If it is already gone, a notifier dequeued it and the
    /// notification is absorbed so the wait reports success.
    fn dequeue_timed_out_waiter(&self, node: &WaiterQueueNode) -> bool {
        let target: *const WaiterQueueNode = node;
        let removed = {
            let mut guard = self.primitive.lock_waiter_queue();
            guard.dequeue_matching(|n| ptr::eq(n, target)).is_some()
        };
        if removed {
            trace!("condition {:p}: wait timed out", self);
            return false;
        }

        node.wait(None);
        debug!("condition {:p}: notification raced a timeout and won", self);
        true
    }

    /// Wakes up to `count` waiters in FIFO order; [`ALL_WAITERS`] wakes them all.
    /// Returns how many waiters were woken.
    pub fn notify(&self, count: u32) -> u32 {
        if count == 0 || !self.primitive.has_waiters() {
            return 0;
        }

        let list = {
            let mut guard = self.primitive.lock_waiter_queue();
            if count == ALL_WAITERS {
                guard.dequeue_all()
            } else {
                guard.dequeue_count(count)
            }
        };

        let woken = unsafe { waiter_queue::notify_all(list) };
        trace!("condition {:p}: notified {} of {} waiters", self, woken, count);
        woken
    }

    pub fn notify_one(&self) -> bool {
        self.notify(1) == 1
    }

    pub fn notify_all(&self) -> u32 {
        self.notify(ALL_WAITERS)
    }

    /// Number of threads waiting on the condition.
    pub fn num_waiters(&self) -> u32 {
        self.primitive.lock_waiter_queue().len()
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

use crate::state::{StateT, SyncPrimitive, IS_LOCKED};
use crate::thread_id::ThreadId;
use crate::waiter_queue::WaiterQueueNode;
use core::{
    ptr,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};
use crossbeam_utils::Backoff;
use log::{debug, trace};
use std::time::Instant;

/// A non-recursive mutex that manages its own queue of parked threads (a futex in userland).
///
/// - Fast when uncontended: a single CAS on the state word.
/// - Spins briefly under contention, then parks on an intrusive, FIFO waiter queue.
/// - Possibly unfair: a thread arriving while the lock is free may take it ahead of a
///   queued waiter that was just woken. Queued waiters are woken in FIFO order.
///
/// Locking:
///  1. Fast path: `0b000 -> 0b100`.
///  2. Otherwise spin on acquiring `IS_LOCKED` until the backoff completes.
///  3. Then, while `IS_LOCKED` is still set, take `QUEUE_LOCKED`, enqueue a node, release
///     `QUEUE_LOCKED` setting `HAS_WAITERS` in the same CAS, and park. On wake go to 2.
///
/// Unlocking:
///  1. Fast path: `0b100 -> 0b000`.
///  2. Otherwise take `QUEUE_LOCKED`, dequeue the head waiter, release `QUEUE_LOCKED` and
///     `IS_LOCKED` together, then notify the dequeued waiter.
pub struct RawMutex {
    primitive: SyncPrimitive,
    owner: AtomicU32,
}

const UNLOCKED_UNCONTENDED: StateT = 0;
const LOCKED_UNCONTENDED: StateT = IS_LOCKED;
const NO_OWNER: u32 = 0;

impl RawMutex {
    pub const fn new() -> Self {
        Self {
            primitive: SyncPrimitive::new(),
            owner: AtomicU32::new(NO_OWNER),
        }
    }

    /// Locks the mutex, parking for at most `timeout` (forever if `None`).
    /// Returns false if the timeout elapsed first.
    pub fn lock_for(&self, timeout: Option<Duration>) -> bool {
        self.lock_until(timeout.and_then(|timeout| Instant::now().checked_add(timeout)))
    }

    /// Locks the mutex, parking until at most `deadline` (forever if `None`).
    /// Returns false if the deadline passed first.
    pub fn lock_until(&self, deadline: Option<Instant>) -> bool {
        debug_assert!(
            !self.is_current_thread_owner(),
            "cannot recursively acquire a mutex"
        );
        let locked = self
            .primitive
            .state()
            .compare_exchange_weak(
                UNLOCKED_UNCONTENDED,
                LOCKED_UNCONTENDED,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
            || self.lock_slow(deadline);
        if locked {
            self.set_current_thread_as_owner();
        }
        locked
    }

    /// Advisory: whether some thread holds the mutex right now.
    pub fn is_held(&self) -> bool {
        self.primitive.state().load(Ordering::Relaxed) & IS_LOCKED != 0
    }

    pub fn is_current_thread_owner(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == ThreadId::current().to_u32()
    }

    /// Number of threads parked on the mutex.
    pub fn num_waiters(&self) -> u32 {
        self.primitive.lock_waiter_queue().len()
    }

    #[inline]
    fn set_current_thread_as_owner(&self) {
        self.owner
            .store(ThreadId::current().to_u32(), Ordering::Relaxed);
    }

    #[inline]
    fn clear_owner_thread(&self) {
        self.owner.store(NO_OWNER, Ordering::Relaxed);
    }

    /// Takes `IS_LOCKED` if it is clear in `expected`, refreshing `expected` on failure.
    fn try_lock_explicit(&self, expected: &mut StateT) -> bool {
        while *expected & IS_LOCKED == 0 {
            match self.primitive.state().compare_exchange_weak(
                *expected,
                *expected | IS_LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(s) => *expected = s,
            }
        }
        false
    }

    #[cold]
    fn lock_slow(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.primitive.state().load(Ordering::Relaxed);
        loop {
            let backoff = Backoff::new();
            loop {
                if self.try_lock_explicit(&mut state) {
                    return true;
                }
                if backoff.is_completed() {
                    break;
                }
                backoff.snooze();
                state = self.primitive.state().load(Ordering::Relaxed);
            }

            let node = WaiterQueueNode::new();
            match self
                .primitive
                .lock_waiter_queue_if(|s| s & IS_LOCKED != 0)
            {
                Some(mut guard) => {
                    unsafe { guard.enqueue(&node) };
                    drop(guard);
                }
                None => {
                    state = self.primitive.state().load(Ordering::Relaxed);
                    continue;
                }
            }

            trace!("mutex {:p}: parking thread {:?}", self, ThreadId::current());
            if !node.wait(deadline) {
                return self.lock_or_dequeue_timed_out_waiter(&node);
            }
            state = self.primitive.state().load(Ordering::Relaxed);
        }
    }

    /// Settles a waiter whose deadline passed.
    ///
    /// If the node is still queued it is removed and the lock attempt fails. Otherwise a
    /// racing unlock already dequeued it and is about to notify it: the waiter takes the
    /// mutex if it is free, then absorbs that notification before the node goes away.
    fn lock_or_dequeue_timed_out_waiter(&self, node: &WaiterQueueNode) -> bool {
        let target: *const WaiterQueueNode = node;
        let mut guard = self.primitive.lock_waiter_queue();
        if guard.dequeue_matching(|n| ptr::eq(n, target)).is_some() {
            drop(guard);
            trace!("mutex {:p}: lock timed out", self);
            return false;
        }

        let old = guard.release_with(|s| s | IS_LOCKED);
        node.wait(None);
        let acquired = old & IS_LOCKED == 0;
        debug!(
            "mutex {:p}: timed-out waiter lost the handoff race, acquired = {}",
            self, acquired
        );
        acquired
    }

    fn unlock_owned(&self) {
        debug_assert!(
            self.is_current_thread_owner(),
            "unlocking a mutex not held by the current thread"
        );
        self.clear_owner_thread();
        if self
            .primitive
            .state()
            .compare_exchange(
                LOCKED_UNCONTENDED,
                UNLOCKED_UNCONTENDED,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_err()
        {
            self.unlock_slow();
        }
    }

    #[cold]
    fn unlock_slow(&self) {
        let mut guard = self.primitive.lock_waiter_queue();
        let waiter = guard.dequeue_head();
        guard.release_with(|s| s & !IS_LOCKED);

        if let Some(waiter) = waiter {
            trace!("mutex {:p}: waking head waiter", self);
            unsafe { WaiterQueueNode::notify(waiter) };
        }
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl lock_api::RawMutex for RawMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    // The owner is tracked per thread, so a guard must be released where it was taken.
    type GuardMarker = lock_api::GuardNoSend;

    fn lock(&self) {
        let locked = self.lock_until(None);
        debug_assert!(locked);
    }

    fn try_lock(&self) -> bool {
        let mut state = self.primitive.state().load(Ordering::Relaxed);
        if self.try_lock_explicit(&mut state) {
            self.set_current_thread_as_owner();
            return true;
        }
        false
    }

    unsafe fn unlock(&self) {
        self.unlock_owned();
    }

    fn is_locked(&self) -> bool {
        self.is_held()
    }
}

unsafe impl lock_api::RawMutexTimed for RawMutex {
    type Duration = Duration;
    type Instant = Instant;

    fn try_lock_for(&self, timeout: Duration) -> bool {
        self.lock_for(Some(timeout))
    }

    fn try_lock_until(&self, deadline: Instant) -> bool {
        self.lock_until(Some(deadline))
    }
}

pub type Mutex<T> = lock_api::Mutex<RawMutex, T>;
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, RawMutex, T>;

/// Scoped ownership of a [`RawMutex`] that may or may not have been acquired.
///
/// The mutex is released on drop only if the guard acquired it.
#[must_use = "if unused the mutex is released immediately"]
pub struct LockGuard<'a> {
    mutex: &'a RawMutex,
    locked: bool,
}

impl<'a> LockGuard<'a> {
    /// Locks `mutex`, giving up after `timeout`.
    pub fn new(mutex: &'a RawMutex, timeout: Option<Duration>) -> Self {
        let locked = mutex.lock_for(timeout);
        Self { mutex, locked }
    }

    /// Attempts to lock `mutex` without blocking.
    pub fn try_new(mutex: &'a RawMutex) -> Self {
        let locked = lock_api::RawMutex::try_lock(mutex);
        Self { mutex, locked }
    }

    pub fn locked(&self) -> bool {
        self.locked
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.locked {
            self.mutex.unlock_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{HAS_WAITERS, QUEUE_LOCKED};
    use lock_api::RawMutex as _;
    use std::thread;

    fn state_of(mutex: &RawMutex) -> StateT {
        mutex.primitive.state().load(Ordering::Relaxed)
    }

    #[test]
    fn uncontended_lock_unlock() {
        let mutex = RawMutex::new();
        assert!(!mutex.is_held());
        assert!(mutex.lock_for(None));
        assert!(mutex.is_held());
        assert!(mutex.is_current_thread_owner());
        unsafe { mutex.unlock() };
        assert!(!mutex.is_held());
        assert!(!mutex.is_current_thread_owner());
        assert_eq!(state_of(&mutex), 0);
    }

    #[test]
    fn try_lock_failure_has_no_side_effects() {
        let mutex = RawMutex::new();
        thread::scope(|s| {
            mutex.lock();
            s.spawn(|| {
                for _ in 0..100 {
                    assert!(!mutex.try_lock());
                }
                assert!(!mutex.is_current_thread_owner());
            })
            .join()
            .unwrap();
            assert_eq!(state_of(&mutex), IS_LOCKED);
            assert!(mutex.is_current_thread_owner());
            unsafe { mutex.unlock() };
        });
        assert!(mutex.try_lock());
        unsafe { mutex.unlock() };
        assert_eq!(state_of(&mutex), 0);
    }

    #[test]
    fn timeout_leaves_no_waiter_behind() {
        let mutex = RawMutex::new();
        mutex.lock();
        thread::scope(|s| {
            s.spawn(|| {
                let start = Instant::now();
                assert!(!mutex.lock_for(Some(Duration::from_millis(50))));
                assert!(start.elapsed() >= Duration::from_millis(50));
            });
        });
        assert_eq!(mutex.num_waiters(), 0);
        assert_eq!(state_of(&mutex) & (HAS_WAITERS | QUEUE_LOCKED), 0);
        unsafe { mutex.unlock() };
        assert_eq!(state_of(&mutex), 0);
    }

    #[test]
    fn zero_timeout_on_held_mutex_fails() {
        let mutex = RawMutex::new();
        mutex.lock();
        thread::scope(|s| {
            s.spawn(|| assert!(!mutex.lock_for(Some(Duration::ZERO))));
        });
        unsafe { mutex.unlock() };
    }

    #[test]
    fn contended_waiter_parks_and_is_woken() {
        let mutex = RawMutex::new();
        mutex.lock();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                assert!(mutex.lock_for(Some(Duration::from_secs(10))));
                assert!(mutex.is_current_thread_owner());
                unsafe { mutex.unlock() };
            });
            while mutex.num_waiters() == 0 {
                thread::yield_now();
            }
            assert!(state_of(&mutex) & HAS_WAITERS != 0);
            unsafe { mutex.unlock() };
            waiter.join().unwrap();
        });
        assert_eq!(state_of(&mutex), 0);
    }

    #[test]
    fn timed_out_waiter_dequeued_by_unlock_takes_the_lock() {
        let mutex = RawMutex::new();
        mutex.lock();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let acquired = mutex.lock_for(Some(Duration::from_millis(20)));
                let owner = mutex.is_current_thread_owner();
                if acquired {
                    unsafe { mutex.unlock() };
                }
                (acquired, owner)
            });
            while mutex.num_waiters() == 0 {
                thread::yield_now();
            }

            // Unlock by hand, holding the queue lock until the waiter's deadline has passed.
            let mut guard = mutex.primitive.lock_waiter_queue();
            thread::sleep(Duration::from_millis(100));
            mutex.clear_owner_thread();
            let node = guard.dequeue_head();
            assert!(node.is_some());
            let old = guard.release_with(|s| s & !IS_LOCKED);
            assert!(old & IS_LOCKED != 0);

            while state_of(&mutex) & IS_LOCKED == 0 {
                thread::yield_now();
            }
            if let Some(node) = node {
                unsafe { WaiterQueueNode::notify(node) };
            }

            assert_eq!(waiter.join().unwrap(), (true, true));
        });
        assert_eq!(state_of(&mutex), 0);
        assert_eq!(mutex.num_waiters(), 0);
    }

    #[test]
    fn lock_guard_releases_only_when_locked() {
        let mutex = RawMutex::new();
        {
            let guard = LockGuard::new(&mutex, None);
            assert!(guard.locked());
            thread::scope(|s| {
                s.spawn(|| {
                    let guard = LockGuard::try_new(&mutex);
                    assert!(!guard.locked());
                    let guard = LockGuard::new(&mutex, Some(Duration::from_millis(10)));
                    assert!(!guard.locked());
                });
            });
            assert!(mutex.is_held());
        }
        assert!(!mutex.is_held());
    }

    #[test]
    fn lock_api_mutex_counts() {
        const THREADS: usize = 4;
        const ITERS: usize = 2_000;
        let counter = Mutex::new(0usize);
        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..ITERS {
                        *counter.lock() += 1;
                    }
                });
            }
        });
        assert_eq!(counter.into_inner(), THREADS * ITERS);
    }

    #[test]
    fn timed_lock_api() {
        use lock_api::RawMutexTimed;
        let mutex = RawMutex::new();
        assert!(mutex.try_lock_for(Duration::from_millis(1)));
        thread::scope(|s| {
            s.spawn(|| {
                assert!(!mutex.try_lock_until(Instant::now() + Duration::from_millis(10)));
            });
        });
        unsafe { mutex.unlock() };
    }
}

use core::{
    marker::PhantomData,
    ptr::addr_of,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};
use std::time::Instant;

/// Address-based wait/wake provided by the OS.
///
/// # Safety
///
/// `wait` must return once `*ptr != expected`, after a `wake` on `ptr`, or after `timeout`
/// elapsed. Spurious returns are allowed. `wake` must tolerate `ptr` no longer pointing at
/// live memory: it only uses the address as a key.
pub unsafe trait Futex {
    fn wake(ptr: *const AtomicU32);
    fn wait(ptr: *const AtomicU32, expected: u32, timeout: Option<Duration>);
}

const WAITING: u32 = 0;
const NOTIFIED: u32 = 1;

/// One-shot parker for a single waiter: created unnotified, notified at most once.
pub struct FutexParker<F> {
    state: AtomicU32,
    futex: PhantomData<F>,
}

impl<F: Futex> FutexParker<F> {
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(WAITING),
            futex: PhantomData,
        }
    }

    /// Blocks until notified or until `deadline`. Returns true if notified.
    pub fn park(&self, deadline: Option<Instant>) -> bool {
        loop {
            if self.state.load(Ordering::Acquire) == NOTIFIED {
                return true;
            }
            let timeout = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    Some(deadline - now)
                }
            };
            F::wait(&self.state, WAITING, timeout);
        }
    }

    /// # Safety
    ///
    /// `parker` must be live on entry. The parked thread may free it as soon as the
    /// notification is published, so it is not dereferenced afterwards.
    pub unsafe fn unpark(parker: *const Self) {
        let state = addr_of!((*parker).state);
        (*state).store(NOTIFIED, Ordering::Release);
        F::wake(state);
    }
}

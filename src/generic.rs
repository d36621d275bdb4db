use core::{
    ptr::addr_of,
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::sync::{Parker as ThreadParker, Unparker};
use std::time::Instant;

/// Portable one-shot parker for targets without a native backend.
pub struct Parker {
    notified: AtomicBool,
    parker: ThreadParker,
    unparker: Unparker,
}

// Only the owning thread parks; other threads touch `notified` and `unparker`, both Sync.
unsafe impl Sync for Parker {}

impl Parker {
    pub fn new() -> Self {
        let parker = ThreadParker::new();
        let unparker = parker.unparker().clone();
        Self {
            notified: AtomicBool::new(false),
            parker,
            unparker,
        }
    }

    /// Blocks until notified or until `deadline`. Returns true if notified.
    pub fn park(&self, deadline: Option<Instant>) -> bool {
        loop {
            if self.notified.load(Ordering::Acquire) {
                return true;
            }
            match deadline {
                None => self.parker.park(),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    self.parker.park_deadline(deadline);
                }
            }
        }
    }

    /// # Safety
    ///
    /// `parker` must be live on entry. It is not dereferenced after the notification is
    /// published; the cloned unparker keeps the wake target alive.
    pub unsafe fn unpark(parker: *const Self) {
        let unparker = (*addr_of!((*parker).unparker)).clone();
        (*addr_of!((*parker).notified)).store(true, Ordering::Release);
        unparker.unpark();
    }
}

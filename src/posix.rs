use core::{cell::Cell, mem, time::Duration};
use libc::{
    pthread_cond_destroy, pthread_cond_signal, pthread_cond_t, pthread_cond_timedwait,
    pthread_cond_wait, pthread_mutex_destroy, pthread_mutex_lock, pthread_mutex_t,
    pthread_mutex_unlock, timespec, PTHREAD_COND_INITIALIZER, PTHREAD_MUTEX_INITIALIZER,
};
use std::time::Instant;

/// One-shot parker built on a pthread mutex/condvar pair.
///
/// Must not move once a thread has parked on it.
pub struct Parker {
    is_notified: Cell<bool>,
    cond: Cell<pthread_cond_t>,
    mutex: Cell<pthread_mutex_t>,
}

unsafe impl Sync for Parker {}

impl Drop for Parker {
    fn drop(&mut self) {
        unsafe {
            let r = pthread_mutex_destroy(self.mutex.as_ptr());
            if cfg!(target_os = "dragonfly") {
                debug_assert!(r == 0 || r == libc::EAGAIN);
            } else {
                debug_assert_eq!(r, 0);
            }

            let r = pthread_cond_destroy(self.cond.as_ptr());
            if cfg!(target_os = "dragonfly") {
                debug_assert!(r == 0 || r == libc::EAGAIN);
            } else {
                debug_assert_eq!(r, 0);
            }
        }
    }
}

impl Parker {
    pub const fn new() -> Self {
        Self {
            is_notified: Cell::new(false),
            cond: Cell::new(PTHREAD_COND_INITIALIZER),
            mutex: Cell::new(PTHREAD_MUTEX_INITIALIZER),
        }
    }

    /// Blocks until notified or until `deadline`. Returns true if notified.
    pub fn park(&self, deadline: Option<Instant>) -> bool {
        unsafe {
            let r = pthread_mutex_lock(self.mutex.as_ptr());
            debug_assert_eq!(r, 0);

            while !self.is_notified.get() {
                match deadline {
                    None => {
                        let r = pthread_cond_wait(self.cond.as_ptr(), self.mutex.as_ptr());
                        debug_assert_eq!(r, 0);
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        let abstime = realtime_after(deadline - now);
                        let r = pthread_cond_timedwait(
                            self.cond.as_ptr(),
                            self.mutex.as_ptr(),
                            &abstime,
                        );
                        debug_assert!(r == 0 || r == libc::ETIMEDOUT);
                    }
                }
            }
            let notified = self.is_notified.get();

            let r = pthread_mutex_unlock(self.mutex.as_ptr());
            debug_assert_eq!(r, 0);
            notified
        }
    }

    /// # Safety
    ///
    /// `parker` must be live on entry. The parked thread cannot observe the notification
    /// before the internal mutex is released, which is the last access made here.
    pub unsafe fn unpark(parker: *const Self) {
        let this = &*parker;
        let r = pthread_mutex_lock(this.mutex.as_ptr());
        debug_assert_eq!(r, 0);

        if !this.is_notified.get() {
            this.is_notified.set(true);
            let r = pthread_cond_signal(this.cond.as_ptr());
            debug_assert_eq!(r, 0);
        }

        let r = pthread_mutex_unlock(this.mutex.as_ptr());
        debug_assert_eq!(r, 0);
    }
}

fn realtime_after(timeout: Duration) -> timespec {
    let mut now: timespec = unsafe { mem::zeroed() };
    let r = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
    debug_assert_eq!(r, 0);

    let max_secs = libc::time_t::MAX;
    let secs = timeout.as_secs().min(max_secs as u64) as libc::time_t;
    let mut nsec = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
    let mut sec = now.tv_sec.saturating_add(secs);
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec = sec.saturating_add(1);
    }

    let mut abstime: timespec = unsafe { mem::zeroed() };
    abstime.tv_sec = sec;
    abstime.tv_nsec = nsec as _;
    abstime
}

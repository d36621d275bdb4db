use super::futex;
use core::{
    mem,
    ptr,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};
use libc::{syscall, timespec, SYS_futex, FUTEX_PRIVATE_FLAG, FUTEX_WAIT, FUTEX_WAKE};

pub struct OsFutex;

unsafe impl futex::Futex for OsFutex {
    fn wake(ptr: *const AtomicU32) {
        // The waiter may already have returned and released the word's memory, so the call
        // can fail. Nobody is left to wake then, so the result is ignored.
        let _ = unsafe { syscall(SYS_futex, ptr, FUTEX_WAKE | FUTEX_PRIVATE_FLAG, 1) };
    }

    fn wait(ptr: *const AtomicU32, expected: u32, timeout: Option<Duration>) {
        let ts = timeout.map(|timeout| {
            let mut ts: timespec = unsafe { mem::zeroed() };
            ts.tv_sec = timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t;
            ts.tv_nsec = timeout.subsec_nanos() as _;
            ts
        });
        let ts_ptr = ts.as_ref().map_or(ptr::null(), |ts| ts as *const timespec);

        unsafe {
            if (*ptr).load(Ordering::Acquire) != expected {
                return;
            }
            let r = syscall(SYS_futex, ptr, FUTEX_WAIT | FUTEX_PRIVATE_FLAG, expected, ts_ptr);
            debug_assert!(r == 0 || r == -1);
            if r == -1 {
                let errno = *libc::__errno_location();
                debug_assert!(
                    errno == libc::EAGAIN || errno == libc::EINTR || errno == libc::ETIMEDOUT
                );
            }
        }
    }
}

pub type Parker = futex::FutexParker<OsFutex>;

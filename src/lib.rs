//! Userland futex synchronization primitives: a mutex and a condition variable that keep
//! their own intrusive queue of parked threads behind a spinlock bit in a single state word.

#[cfg(all(feature = "os", any(windows, target_os = "linux")))]
mod futex;

#[cfg(all(feature = "os", windows))]
mod windows;
#[cfg(all(feature = "os", windows))]
use windows::Parker;

#[cfg(all(feature = "os", target_os = "linux"))]
mod linux;
#[cfg(all(feature = "os", target_os = "linux"))]
use linux::Parker;

#[cfg(all(feature = "os", unix, not(target_os = "linux")))]
mod posix;
#[cfg(all(feature = "os", unix, not(target_os = "linux")))]
use posix::Parker;

#[cfg(not(all(feature = "os", any(windows, unix))))]
mod generic;
#[cfg(not(all(feature = "os", any(windows, unix))))]
use generic::Parker;

pub mod api;
mod condition;
mod error;
mod mutex;
mod state;
mod thread_id;
mod waiter_queue;

pub use condition::{Condition, ALL_WAITERS};
pub use error::{Error, Result};
pub use mutex::{LockGuard, Mutex, MutexGuard, RawMutex};
pub use thread_id::ThreadId;

//! Boundary used by a managed-language runtime exposing mutex and condition objects to
//! user code: cheap clonable handles, millisecond timeouts, and ownership checks that
//! report contract violations as [`Error`]s instead of deadlocking.

use crate::condition::{Condition, ALL_WAITERS};
use crate::error::{Error, Result};
use crate::mutex::{LockGuard, RawMutex};
use core::time::Duration;
use lock_api::RawMutex as _;
use std::sync::Arc;

/// How long a blocking operation may park. The default waits forever.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timeout(Option<Duration>);

impl Timeout {
    pub const FOREVER: Self = Self(None);

    /// Converts a script-level millisecond count.
    ///
    /// NaN, +∞ and values too large for a [`Duration`] wait forever; negative values
    /// (including -∞) do not wait at all.
    pub fn from_millis(ms: f64) -> Self {
        if ms.is_nan() {
            return Self::FOREVER;
        }
        let secs = ms.max(0.0) / 1000.0;
        match Duration::try_from_secs_f64(secs) {
            Ok(duration) => Self(Some(duration)),
            Err(_) => Self::FOREVER,
        }
    }

    pub fn as_duration(self) -> Option<Duration> {
        self.0
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self(Some(duration))
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        Self(duration)
    }
}

/// How many waiters a notify should wake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyCount {
    Count(u32),
    All,
}

impl NotifyCount {
    /// Converts a script-level count: NaN and negatives wake nobody, +∞ and anything at
    /// or above `u32::MAX` wake everyone, fractions truncate.
    pub fn from_number(count: f64) -> Self {
        if count.is_nan() || count <= 0.0 {
            return Self::Count(0);
        }
        if count >= ALL_WAITERS as f64 {
            return Self::All;
        }
        Self::Count(count as u32)
    }

    fn as_raw(self) -> u32 {
        match self {
            Self::Count(count) => count.min(ALL_WAITERS - 1),
            Self::All => ALL_WAITERS,
        }
    }
}

impl Default for NotifyCount {
    fn default() -> Self {
        Self::All
    }
}

/// Shared handle to a mutex.
#[derive(Clone, Default)]
pub struct SharedMutex {
    raw: Arc<RawMutex>,
}

impl SharedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks without blocking. Returns false if any thread, including this one, holds it.
    pub fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    /// Locks, parking for at most `timeout`. `Ok(false)` means the timeout elapsed.
    pub fn lock(&self, timeout: impl Into<Timeout>) -> Result<bool> {
        if self.raw.is_current_thread_owner() {
            return Err(Error::RecursiveLock);
        }
        Ok(self.raw.lock_for(timeout.into().as_duration()))
    }

    pub fn unlock(&self) -> Result<()> {
        if !self.raw.is_current_thread_owner() {
            return Err(Error::NotOwner);
        }
        unsafe { self.raw.unlock() };
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.raw.is_held()
    }

    pub fn is_current_thread_owner(&self) -> bool {
        self.raw.is_current_thread_owner()
    }

    /// Runs `f` with the mutex held, releasing it afterwards even if `f` unwinds.
    /// Returns `Ok(None)` if the lock could not be taken within `timeout`.
    pub fn run_locked<R>(
        &self,
        timeout: impl Into<Timeout>,
        f: impl FnOnce() -> R,
    ) -> Result<Option<R>> {
        if self.raw.is_current_thread_owner() {
            return Err(Error::RecursiveLock);
        }
        let guard = LockGuard::new(&self.raw, timeout.into().as_duration());
        Ok(guard.locked().then(f))
    }

    /// Runs `f` only if the mutex can be taken without blocking.
    pub fn try_run_locked<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let guard = LockGuard::try_new(&self.raw);
        guard.locked().then(f)
    }

    pub fn num_waiters(&self) -> u32 {
        self.raw.num_waiters()
    }

    pub fn raw(&self) -> &RawMutex {
        &self.raw
    }
}

/// Shared handle to a condition variable.
#[derive(Clone, Default)]
pub struct SharedCondition {
    raw: Arc<Condition>,
}

impl SharedCondition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `mutex`, waits for a notification for at most `timeout`, and relocks it.
    /// `Ok(false)` means the timeout elapsed.
    pub fn wait(&self, mutex: &SharedMutex, timeout: impl Into<Timeout>) -> Result<bool> {
        if !mutex.raw.is_current_thread_owner() {
            return Err(Error::NotOwner);
        }
        Ok(self.raw.wait_for(&mutex.raw, timeout.into().as_duration()))
    }

    /// Wakes up to `count` waiters and returns how many were woken.
    pub fn notify(&self, count: NotifyCount) -> u32 {
        self.raw.notify(count.as_raw())
    }

    pub fn num_waiters(&self) -> u32 {
        self.raw.num_waiters()
    }

    pub fn raw(&self) -> &Condition {
        &self.raw
    }
}

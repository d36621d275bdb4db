use thiserror::Error;

/// Contract violations reported by the [`api`](crate::api) boundary.
///
/// Timeouts are not errors: they surface as `false` / `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("mutex is already held by the current thread")]
    RecursiveLock,
    #[error("mutex is not held by the current thread")]
    NotOwner,
}

pub type Result<T> = core::result::Result<T, Error>;

use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU32, Ordering};

/// A stable, comparable identity for an OS thread.
///
/// Ids are handed out lazily the first time a thread asks for one and are never reused.
/// Zero is reserved to mean "no thread", which lets an owner field live in a plain `AtomicU32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(NonZeroU32);

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

std::thread_local! {
    static CURRENT: ThreadId = ThreadId::allocate(&NEXT_ID);
}

impl ThreadId {
    pub fn current() -> Self {
        CURRENT.with(|id| *id)
    }

    pub fn to_u32(self) -> u32 {
        self.0.get()
    }

    fn allocate(next: &AtomicU32) -> Self {
        let id = next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .ok()
            .and_then(NonZeroU32::new);
        match id {
            Some(id) => Self(id),
            None => panic!("thread id space exhausted"),
        }
    }
}

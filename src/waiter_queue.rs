//! Intrusive waiter list shared by the mutex and the condition variable.
//!
//! The list is circular and doubly linked: the head's `prev` is the tail, so both
//! enqueue-at-tail and dequeue-at-head are O(1). Nodes live on the stack of the thread
//! that waits on them and are only reachable through the list while the owning
//! primitive's queue lock is held.

use crate::mutex::RawMutex;
use crate::Parker;
use core::{
    cell::Cell,
    ptr::{self, addr_of, NonNull},
};
use std::time::Instant;

pub(crate) struct WaiterQueueNode {
    next: Cell<*const WaiterQueueNode>,
    prev: Cell<*const WaiterQueueNode>,
    mutex: Option<NonNull<RawMutex>>,
    parker: Parker,
}

impl WaiterQueueNode {
    pub(crate) fn new() -> Self {
        Self {
            next: Cell::new(ptr::null()),
            prev: Cell::new(ptr::null()),
            mutex: None,
            parker: Parker::new(),
        }
    }

    /// A condition variable waiter that reacquires `mutex` once woken.
    pub(crate) fn with_mutex(mutex: &RawMutex) -> Self {
        Self {
            mutex: Some(NonNull::from(mutex)),
            ..Self::new()
        }
    }

    /// Parks the current thread until the node is notified or `deadline` passes.
    /// Returns true if notified. Only the thread that created the node may wait on it.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> bool {
        self.parker.park(deadline)
    }

    /// Reacquires the mutex this waiter released before parking.
    pub(crate) fn reacquire_mutex(&self) {
        if let Some(mutex) = self.mutex {
            // The waiter borrowed the mutex for its whole wait, so it is still live here.
            unsafe { mutex.as_ref() }.lock_until(None);
        }
    }

    /// # Safety
    ///
    /// `node` must have been dequeued by the caller and still be live. The waiter may
    /// return and drop the node as soon as it observes the notification.
    pub(crate) unsafe fn notify(node: *const Self) {
        Parker::unpark(addr_of!((*node).parker));
    }
}

// Every function below requires the queue lock of the primitive owning `head` to be held
// and every linked node to be live.

pub(crate) unsafe fn enqueue(head: &mut *const WaiterQueueNode, node: &WaiterQueueNode) {
    let node_ptr = node as *const WaiterQueueNode;
    if head.is_null() {
        node.next.set(node_ptr);
        node.prev.set(node_ptr);
        *head = node_ptr;
        return;
    }

    let first = &**head;
    let last = first.prev.get();
    node.next.set(*head);
    node.prev.set(last);
    (*last).next.set(node_ptr);
    first.prev.set(node_ptr);
}

pub(crate) unsafe fn dequeue_head(head: &mut *const WaiterQueueNode) -> *const WaiterQueueNode {
    let first = *head;
    if !first.is_null() {
        unlink(head, first);
    }
    first
}

pub(crate) unsafe fn dequeue_matching(
    head: &mut *const WaiterQueueNode,
    mut matches: impl FnMut(&WaiterQueueNode) -> bool,
) -> *const WaiterQueueNode {
    let first = *head;
    if first.is_null() {
        return ptr::null();
    }

    let mut current = first;
    loop {
        if matches(&*current) {
            unlink(head, current);
            return current;
        }
        current = (*current).next.get();
        if current == first {
            return ptr::null();
        }
    }
}

/// Detaches the whole list, returning its old head.
pub(crate) unsafe fn dequeue_all(head: &mut *const WaiterQueueNode) -> *const WaiterQueueNode {
    let first = *head;
    *head = ptr::null();
    first
}

/// Detaches up to `count` nodes from the front as their own circular list.
pub(crate) unsafe fn split(head: &mut *const WaiterQueueNode, count: u32) -> *const WaiterQueueNode {
    let first = *head;
    if first.is_null() || count == 0 {
        return ptr::null();
    }

    let mut last = first;
    for _ in 1..count {
        let next = (*last).next.get();
        if next == first {
            return dequeue_all(head);
        }
        last = next;
    }
    let rest = (*last).next.get();
    if rest == first {
        return dequeue_all(head);
    }

    let tail = (*first).prev.get();
    (*rest).prev.set(tail);
    (*tail).next.set(rest);
    *head = rest;

    (*first).prev.set(last);
    (*last).next.set(first);
    first
}

pub(crate) unsafe fn len(head: *const WaiterQueueNode) -> u32 {
    if head.is_null() {
        return 0;
    }
    let mut count = 1;
    let mut current = (*head).next.get();
    while current != head {
        count += 1;
        current = (*current).next.get();
    }
    count
}

/// Notifies every node of a detached list and returns how many there were.
///
/// # Safety
///
/// The list must no longer be reachable from any queue. Each node's links are read before
/// it is notified, since its waiter may drop it right after.
pub(crate) unsafe fn notify_all(list: *const WaiterQueueNode) -> u32 {
    let count = len(list);
    let mut current = list;
    for _ in 0..count {
        let next = (*current).next.get();
        WaiterQueueNode::notify(current);
        current = next;
    }
    count
}

unsafe fn unlink(head: &mut *const WaiterQueueNode, node: *const WaiterQueueNode) {
    let next = (*node).next.get();
    if next == node {
        *head = ptr::null();
    } else {
        let prev = (*node).prev.get();
        (*prev).next.set(next);
        (*next).prev.set(prev);
        if *head == node {
            *head = next;
        }
    }
    (*node).next.set(ptr::null());
    (*node).prev.set(ptr::null());
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Rendezvous channels.
//!
//! A channel is a single slot shared by every routine holding a clone of it.
//! At most one value is resident at a time. `try_put` and `try_take` are the
//! only mutation points; each success wakes every registered waiter.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identity, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

struct Slot<T> {
    id: ChannelId,
    value: RefCell<Option<T>>,
    /// Wakers of routines parked until this slot changes.
    waiters: RefCell<Vec<Waker>>,
    /// Successful puts + takes, for tests and logs.
    transfers: Cell<u64>,
}

/// Capacity-1 rendezvous channel.
///
/// Cloning yields another handle to the same slot.
pub struct Chan<T> {
    slot: Rc<Slot<T>>,
}

/// Create an empty channel.
pub fn chan<T>() -> Chan<T> {
    Chan::new()
}

impl<T> Chan<T> {
    pub fn new() -> Self {
        Self {
            slot: Rc::new(Slot {
                id: ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)),
                value: RefCell::new(None),
                waiters: RefCell::new(Vec::new()),
                transfers: Cell::new(0),
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.slot.id
    }

    /// Store `val` if the slot is empty. A full slot hands the value back.
    pub fn try_put(&self, val: T) -> Result<(), T> {
        {
            let mut value = self.slot.value.borrow_mut();
            if value.is_some() {
                return Err(val);
            }
            *value = Some(val);
        }
        self.changed();
        Ok(())
    }

    /// Remove and return the resident value, if any.
    pub fn try_take(&self) -> Option<T> {
        let taken = self.slot.value.borrow_mut().take();
        if taken.is_some() {
            self.changed();
        }
        taken
    }

    pub fn is_empty(&self) -> bool {
        self.slot.value.borrow().is_none()
    }

    pub fn is_full(&self) -> bool {
        !self.is_empty()
    }

    /// Number of successful puts and takes so far.
    pub fn transfers(&self) -> u64 {
        self.slot.transfers.get()
    }

    /// Wake `waker` the next time the slot changes.
    ///
    /// Level-triggered: the woken side must re-probe, and may find the slot
    /// already claimed by someone else.
    pub fn register(&self, waker: &Waker) {
        let mut waiters = self.slot.waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }

    /// Forget `waker` if it is still registered.
    pub fn deregister(&self, waker: &Waker) {
        self.slot.waiters.borrow_mut().retain(|w| !w.will_wake(waker));
    }

    pub fn waiter_count(&self) -> usize {
        self.slot.waiters.borrow().len()
    }

    fn changed(&self) {
        self.slot.transfers.set(self.slot.transfers.get() + 1);
        // Detach the list first: a waker may re-register on this channel.
        let waiters = std::mem::take(&mut *self.slot.waiters.borrow_mut());
        for waker in waiters {
            waker.wake();
        }
    }
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Chan {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Default for Chan<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Chan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chan")
            .field("id", &self.slot.id)
            .field("full", &self.is_full())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

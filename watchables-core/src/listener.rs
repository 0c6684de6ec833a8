//! L0: weakly-held, deterministically-ordered subscriber storage.
//!
//! A [`Listener`] is a zero-argument callable; its *identity* (the
//! allocation behind the `Rc`), not its value, is what deduplicates set
//! membership and what a [`WeakSubscriberSet`] stores weakly. This mirrors
//! the `Weak`-backed listener-set idiom used by `mindbeam-observable-rs`'s
//! `ListenerSet`: subscribers hand out a strong `Rc`, the set stores only a
//! `Weak` clone of it, and a "working set" is snapshotted before dispatch
//! so that subscribers attaching or detaching mid-dispatch never observe a
//! half-iterated set.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::panic_message;

/// A zero-argument callable subscribed to a watchable's dirty or change
/// channel. Callers keep a strong `Rc` alive for as long as they want the
/// subscription to matter; the registry only ever stores a `Weak` copy.
pub type Listener = Rc<dyn Fn()>;

/// Handle returned by `subscribe_dirty`/`subscribe_change`. Idempotent:
/// calling `unsubscribe` more than once, or after the listener was already
/// collected, is a no-op.
pub struct UnsubscribeHandle {
    set: Weak<RefCell<Inner>>,
    id: u64,
    /// Extra side effect run after removal, e.g. `PassiveDerived` re-checking
    /// its listener count for a possible active→passive transition.
    on_unsubscribe: Option<Rc<dyn Fn()>>,
}

impl UnsubscribeHandle {
    /// Remove the associated listener from its set. Safe to call any
    /// number of times.
    pub fn unsubscribe(&self) {
        if let Some(set) = self.set.upgrade() {
            set.borrow_mut().entries.shift_remove(&self.id);
        }
        if let Some(cb) = &self.on_unsubscribe {
            cb();
        }
    }

    /// Attach a callback to run (in addition to the normal removal) every
    /// time `unsubscribe` is called.
    pub(crate) fn with_extra(mut self, cb: Rc<dyn Fn()>) -> Self {
        self.on_unsubscribe = Some(cb);
        self
    }

    fn dangling() -> Self {
        Self {
            set: Weak::new(),
            id: 0,
            on_unsubscribe: None,
        }
    }
}

struct Inner {
    next_id: u64,
    entries: IndexMap<u64, Weak<dyn Fn()>>,
}

/// An insertion-ordered set of weakly-held listeners.
///
/// Iteration tolerates listeners that have been weakly collected (they are
/// pruned on the next pass) and tolerates listeners that subscribe or
/// unsubscribe other listeners — including themselves — during dispatch:
/// `notify` takes a snapshot of the currently-live listeners before calling
/// any of them.
#[derive(Clone)]
pub struct WeakSubscriberSet {
    inner: Rc<RefCell<Inner>>,
}

impl WeakSubscriberSet {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                next_id: 0,
                entries: IndexMap::new(),
            })),
        }
    }

    /// Insert `listener` weakly. Idempotent on listener identity: if this
    /// exact `Rc` allocation is already present (including as a dead weak
    /// slot not yet pruned), the existing slot is reused.
    pub fn subscribe(&self, listener: &Listener) -> UnsubscribeHandle {
        let weak: Weak<dyn Fn()> = Rc::downgrade(listener);
        let mut inner = self.inner.borrow_mut();

        if let Some((&id, _)) = inner
            .entries
            .iter()
            .find(|(_, existing)| existing.ptr_eq(&weak))
        {
            return UnsubscribeHandle {
                set: Rc::downgrade(&self.inner),
                id,
                on_unsubscribe: None,
            };
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(id, weak);
        UnsubscribeHandle {
            set: Rc::downgrade(&self.inner),
            id,
            on_unsubscribe: None,
        }
    }

    /// Call every live listener, in insertion order, isolating panics so
    /// one failing listener does not block the rest. Dead (collected)
    /// entries are pruned as part of building the dispatch snapshot.
    pub fn notify(&self) {
        let snapshot: Vec<Rc<dyn Fn()>> = {
            let mut inner = self.inner.borrow_mut();
            inner.entries.retain(|_, weak| weak.strong_count() > 0);
            inner
                .entries
                .values()
                .filter_map(|weak| weak.upgrade())
                .collect()
        };

        for listener in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener())) {
                tracing::error!(
                    message = %panic_message(payload),
                    "listener panicked during dispatch; isolated, continuing"
                );
            }
        }
    }

    /// Number of currently-live listeners. Prunes dead entries first.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.entries.retain(|_, weak| weak.strong_count() > 0);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WeakSubscriberSet {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle that was never attached to anything; `unsubscribe` is a no-op.
/// Useful as a placeholder return value.
pub fn dangling_handle() -> UnsubscribeHandle {
    UnsubscribeHandle::dangling()
}

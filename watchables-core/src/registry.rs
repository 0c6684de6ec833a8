//! L0: the two-channel dirty/change registry embedded in every watchable.
//!
//! This is the reusable fragment spec §4.1 describes: two
//! [`WeakSubscriberSet`]s (one per channel), the `dirty`/`signaled` state
//! bits, and the reentrancy guard that makes `assert_not_dispatching_dirty`
//! possible.

use std::cell::Cell;

use crate::dispatch::DirtyDispatchGuard;
use crate::error::{WatchableError, WatchableResult};
use crate::listener::{Listener, UnsubscribeHandle, WeakSubscriberSet};

/// Embedded in [`crate::field::Field`], [`crate::derived::DerivedValue`],
/// [`crate::counter::Signal`] and every other primitive: owns the dirty and
/// change subscriber channels and the two-phase state bits.
pub struct ListenerRegistry {
    dirty_subs: WeakSubscriberSet,
    change_subs: WeakSubscriberSet,
    dirty: Cell<bool>,
    signaled: Cell<bool>,
    /// Local mirror of the reentrancy flag, kept for introspection/Debug;
    /// the actual fail-fast check consults the graph-wide guard in
    /// `dispatch`, since spec's `DirtyBeforeRead` applies "anywhere in the
    /// graph", not just to this registry's own dispatch.
    dispatching_dirty: Cell<bool>,
}

impl ListenerRegistry {
    /// `initial_dirty` lets callers model spec §3's requirement that a
    /// freshly constructed [`crate::derived::DerivedValue`] starts dirty
    /// (forcing computation on first read) while a [`crate::field::Field`]
    /// starts clean.
    pub fn new(initial_dirty: bool) -> Self {
        Self {
            dirty_subs: WeakSubscriberSet::new(),
            change_subs: WeakSubscriberSet::new(),
            dirty: Cell::new(initial_dirty),
            signaled: Cell::new(false),
            dispatching_dirty: Cell::new(false),
        }
    }

    pub fn subscribe_dirty(&self, listener: &Listener) -> UnsubscribeHandle {
        self.dirty_subs.subscribe(listener)
    }

    pub fn subscribe_change(&self, listener: &Listener) -> UnsubscribeHandle {
        self.change_subs.subscribe(listener)
    }

    pub fn dirty_subscriber_count(&self) -> usize {
        self.dirty_subs.len()
    }

    pub fn change_subscriber_count(&self) -> usize {
        self.change_subs.len()
    }

    pub fn listener_count(&self) -> usize {
        self.dirty_subscriber_count() + self.change_subscriber_count()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.get()
    }

    /// Mark clean; called at the start of a `read()` that is about to
    /// (re)compute or return the current value.
    pub fn clear_dirty(&self) {
        self.dirty.set(false);
    }

    pub fn mark_dirty_bit(&self) {
        self.dirty.set(true);
    }

    pub fn clear_signaled(&self) {
        self.signaled.set(false);
    }

    /// No-op if already dirty. Otherwise sets `dirty`, clears `signaled`,
    /// and dispatches to every live dirty subscriber in insertion order.
    pub fn broadcast_dirty(&self) {
        if self.dirty.get() {
            return;
        }
        self.dirty.set(true);
        self.signaled.set(false);

        self.dispatching_dirty.set(true);
        let _guard = DirtyDispatchGuard::enter();
        tracing::trace!("broadcasting dirty");
        self.dirty_subs.notify();
        self.dispatching_dirty.set(false);
    }

    /// No-op if already signaled. Otherwise sets `signaled` and dispatches
    /// to every live change subscriber in insertion order.
    pub fn broadcast_change(&self) {
        if self.signaled.get() {
            return;
        }
        self.signaled.set(true);
        tracing::trace!("broadcasting change");
        self.change_subs.notify();
    }

    /// Spec's `DirtyBeforeRead`: fails if a dirty broadcast is in flight
    /// anywhere in the graph, not just on this registry.
    pub fn assert_not_dispatching_dirty(&self) -> WatchableResult<()> {
        if crate::dispatch::is_dispatching_dirty() {
            Err(WatchableError::ReadDuringDirtyDispatch)
        } else {
            Ok(())
        }
    }
}

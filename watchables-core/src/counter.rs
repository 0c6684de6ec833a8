//! L3: a counter-valued watchable exposing explicit mark-dirty /
//! mark-changed, for hand-built protocols that don't fit the field or
//! derived-value shape (spec §4.8).

use std::cell::Cell;
use std::rc::Rc;

use crate::error::WatchableResult;
use crate::listener::{Listener, UnsubscribeHandle};
use crate::registry::ListenerRegistry;
use crate::watchable::Watchable;

struct SignalInner {
    counter: Cell<u64>,
    registry: ListenerRegistry,
}

/// A watchable of an always-incrementing integer counter. Used internally
/// by [`crate::throttle::Throttled`]'s `throttle_start`/`throttle_end`
/// bookkeeping, and available for hand-rolled protocols that just need a
/// generation counter with dirty/change semantics.
pub struct Signal(Rc<SignalInner>);

impl Clone for Signal {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Signal {
    pub fn new() -> Self {
        Self(Rc::new(SignalInner {
            counter: Cell::new(0),
            registry: ListenerRegistry::new(false),
        }))
    }

    /// Increments the counter and broadcasts dirty (a no-op if already
    /// dirty, per the registry's own coalescing).
    pub fn mark_dirty(&self) {
        self.0.counter.set(self.0.counter.get() + 1);
        self.0.registry.broadcast_dirty();
    }

    pub fn mark_change(&self) {
        self.0.registry.broadcast_change();
    }

    /// `mark_dirty` followed by `mark_change`.
    pub fn signal(&self) {
        self.mark_dirty();
        self.mark_change();
    }

    pub fn is_dirty(&self) -> bool {
        self.0.registry.is_dirty()
    }

    pub fn dirty_subscriber_count(&self) -> usize {
        self.0.registry.dirty_subscriber_count()
    }

    pub fn change_subscriber_count(&self) -> usize {
        self.0.registry.change_subscriber_count()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchable<u64> for Signal {
    fn read(&self) -> WatchableResult<u64> {
        self.0.registry.assert_not_dispatching_dirty()?;
        self.0.registry.clear_dirty();
        Ok(self.0.counter.get())
    }

    fn subscribe_dirty(&self, listener: &Listener) -> UnsubscribeHandle {
        self.0.registry.subscribe_dirty(listener)
    }

    fn subscribe_change(&self, listener: &Listener) -> UnsubscribeHandle {
        self.0.registry.subscribe_change(listener)
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn mark_dirty_increments_and_broadcasts() {
        let s = Signal::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let l: Listener = Rc::new(move || log_clone.borrow_mut().push("dirty"));
        let _h = s.subscribe_dirty(&l);

        assert_eq!(s.read().unwrap(), 0);
        s.mark_dirty();
        assert_eq!(*log.borrow(), vec!["dirty"]);
        assert_eq!(s.read().unwrap(), 1);
    }

    #[test]
    fn repeated_mark_dirty_coalesces_broadcast_but_keeps_counting() {
        let s = Signal::new();
        let calls = Rc::new(RefCell::new(0));
        let calls_clone = calls.clone();
        let l: Listener = Rc::new(move || *calls_clone.borrow_mut() += 1);
        let _h = s.subscribe_dirty(&l);

        s.mark_dirty();
        s.mark_dirty();
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(s.read().unwrap(), 2);
    }

    #[test]
    fn signal_marks_both_dirty_and_change() {
        let s = Signal::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_dirty = log.clone();
        let dirty: Listener = Rc::new(move || log_dirty.borrow_mut().push("dirty"));
        let log_change = log.clone();
        let change: Listener = Rc::new(move || log_change.borrow_mut().push("change"));
        let _hd = s.subscribe_dirty(&dirty);
        let _hc = s.subscribe_change(&change);

        s.signal();
        assert_eq!(*log.borrow(), vec!["dirty", "change"]);
    }

    #[test]
    fn is_dirty_reflects_state_across_read() {
        let s = Signal::new();
        assert!(!s.is_dirty());
        s.mark_dirty();
        assert!(s.is_dirty());
        s.read().unwrap();
        assert!(!s.is_dirty());
    }
}

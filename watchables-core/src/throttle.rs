//! L3: rate-limits a source's forwarded dirty/change events while
//! preserving every two-phase invariant, and exposes its own suppression
//! state as a watchable (spec §4.9).

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::clock::Clock;
use crate::counter::Signal;
use crate::derived::{DerivedValue, WatchContext};
use crate::error::WatchableResult;
use crate::listener::{Listener, UnsubscribeHandle};
use crate::registry::ListenerRegistry;
use crate::watchable::Watchable;

#[derive(Clone, Copy, PartialEq, Eq)]
enum EpochKind {
    Dirty,
    Change,
}

struct Epoch {
    kind: EpochKind,
    pending: Option<EpochKind>,
    #[allow(dead_code)]
    timer: crate::clock::TimerHandle,
}

struct ThrottledInner<T, W> {
    source: W,
    clock: Rc<dyn Clock>,
    period: Duration,
    registry: ListenerRegistry,
    cached: RefCell<Option<T>>,
    epoch: RefCell<Option<Epoch>>,
    dirty_handle: RefCell<Option<UnsubscribeHandle>>,
    change_handle: RefCell<Option<UnsubscribeHandle>>,
    dirty_listener: Listener,
    change_listener: Listener,
    self_weak: Weak<ThrottledInner<T, W>>,
    throttle_start: Signal,
    throttle_end: Signal,
    /// Whether a suppressed update is currently owed downstream; backs
    /// the `throttling` derived value's result (spec's "true between the
    /// first suppressed update and the timer's final discharge").
    pending_flag: Rc<Cell<bool>>,
    throttling: DerivedValue<bool>,
}

impl<T, W> ThrottledInner<T, W>
where
    T: Clone + PartialEq + 'static,
    W: Watchable<T> + Clone + 'static,
{
    fn schedule_timer(&self) -> crate::clock::TimerHandle {
        let weak = self.self_weak.clone();
        self.clock.schedule(
            self.period,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_timer();
                }
            }),
        )
    }

    /// Enters a brand-new epoch of `kind`, from the fully-subscribed
    /// baseline: both channels are put back in the subscribed state first
    /// (mirroring the "no epoch active" state's subscriptions), then the
    /// dirty channel is torn down again if the fresh epoch is dirty-kind —
    /// matching "unsubscribe from dirty events of dependencies" on every
    /// dirty-epoch start, including one promoted from a timer's pending
    /// kind, not only the very first one.
    fn start_epoch(&self, kind: EpochKind) -> Epoch {
        self.resubscribe_all();
        if kind == EpochKind::Dirty {
            self.unsubscribe_dirty();
        }
        Epoch {
            kind,
            pending: None,
            timer: self.schedule_timer(),
        }
    }

    fn unsubscribe_dirty(&self) {
        if let Some(h) = self.dirty_handle.borrow_mut().take() {
            h.unsubscribe();
        }
    }

    fn unsubscribe_change(&self) {
        if let Some(h) = self.change_handle.borrow_mut().take() {
            h.unsubscribe();
        }
    }

    fn resubscribe_all(&self) {
        let mut dh = self.dirty_handle.borrow_mut();
        if dh.is_none() {
            *dh = Some(self.source.subscribe_dirty(&self.dirty_listener));
        }
        drop(dh);
        let mut ch = self.change_handle.borrow_mut();
        if ch.is_none() {
            *ch = Some(self.source.subscribe_change(&self.change_listener));
        }
    }

    /// Spec §4.9's "at least one read on the source during change
    /// broadcast if `throttling` is being observed" — otherwise the
    /// source's own dirty/change bookkeeping could stall waiting for a
    /// read that never comes from outside.
    fn maybe_read_source_for_observer(&self) {
        if self.throttle_start.dirty_subscriber_count() > 0 {
            let _ = self.source.read();
        }
    }

    fn handle_source_dirty(&self) {
        self.unsubscribe_dirty();
        let mut epoch = self.epoch.borrow_mut();
        match epoch.as_mut() {
            None => {
                *epoch = Some(self.start_epoch(EpochKind::Dirty));
                drop(epoch);
                self.registry.broadcast_dirty();
            }
            Some(e) if e.pending.is_none() => {
                e.pending = Some(EpochKind::Dirty);
                self.pending_flag.set(true);
                drop(epoch);
                self.throttle_start.mark_dirty();
            }
            Some(_) => {
                // Already pending: absorb silently, no new information.
            }
        }
    }

    fn handle_source_change(&self) {
        let mut epoch_ref = self.epoch.borrow_mut();
        let continues_change_epoch = matches!(
            epoch_ref.as_ref(),
            Some(e) if e.kind == EpochKind::Change
        );

        if continues_change_epoch {
            let e = epoch_ref.as_mut().expect("checked above");
            e.pending = Some(EpochKind::Change);
            self.pending_flag.set(true);
            drop(epoch_ref);
            self.registry.clear_signaled();
            self.unsubscribe_change();
            self.throttle_start.mark_dirty();
        } else {
            if let Some(e) = epoch_ref.take() {
                e.timer.cancel();
            }
            *epoch_ref = Some(self.start_epoch(EpochKind::Change));
            drop(epoch_ref);
            self.registry.broadcast_change();
            self.maybe_read_source_for_observer();
        }
    }

    fn handle_timer(&self) {
        self.pending_flag.set(false);
        let mut epoch_ref = self.epoch.borrow_mut();
        let current = epoch_ref
            .take()
            .expect("timer fired with no active epoch");

        match current.pending {
            Some(pending_kind) => {
                *epoch_ref = Some(self.start_epoch(pending_kind));
                drop(epoch_ref);
                self.registry.broadcast_dirty();
                self.throttle_end.mark_dirty();
                if pending_kind == EpochKind::Change {
                    self.registry.broadcast_change();
                    self.throttle_end.mark_change();
                    self.maybe_read_source_for_observer();
                }
            }
            None => {
                drop(epoch_ref);
                self.resubscribe_all();
            }
        }
    }
}

/// Rate-limits `source`'s forwarded events to at most one dispatch per
/// `period`, coalescing a burst into its trailing edge while preserving
/// [`crate::registry::ListenerRegistry`]'s ordering invariants on its own
/// dirty/change channels.
pub struct Throttled<T, W> {
    inner: Rc<ThrottledInner<T, W>>,
}

impl<T, W> Clone for Throttled<T, W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, W> Throttled<T, W>
where
    T: Clone + PartialEq + 'static,
    W: Watchable<T> + Clone + 'static,
{
    pub fn new(source: W, period: Duration, clock: Rc<dyn Clock>) -> Self {
        let throttle_start = Signal::new();
        let throttle_end = Signal::new();
        let pending_flag = Rc::new(Cell::new(false));

        let ts = throttle_start.clone();
        let te = throttle_end.clone();
        let flag = pending_flag.clone();
        let throttling = DerivedValue::new(move |watch: &mut WatchContext, _previous| {
            let now = flag.get();
            if now {
                watch.watch::<u64, _>(&te)?;
            } else {
                watch.watch::<u64, _>(&ts)?;
            }
            Ok(now)
        });

        let inner = Rc::new_cyclic(|weak: &Weak<ThrottledInner<T, W>>| {
            let w_dirty = weak.clone();
            let dirty_listener: Listener = Rc::new(move || {
                if let Some(inner) = w_dirty.upgrade() {
                    inner.handle_source_dirty();
                }
            });
            let w_change = weak.clone();
            let change_listener: Listener = Rc::new(move || {
                if let Some(inner) = w_change.upgrade() {
                    inner.handle_source_change();
                }
            });

            ThrottledInner {
                source,
                clock,
                period,
                registry: ListenerRegistry::new(true),
                cached: RefCell::new(None),
                epoch: RefCell::new(None),
                dirty_handle: RefCell::new(None),
                change_handle: RefCell::new(None),
                dirty_listener,
                change_listener,
                self_weak: weak.clone(),
                throttle_start,
                throttle_end,
                pending_flag,
                throttling,
            }
        });

        inner.resubscribe_all();

        Self { inner }
    }

    /// True from the first suppressed update in a burst until the timer
    /// that finally discharges it.
    pub fn throttling(&self) -> DerivedValue<bool> {
        self.inner.throttling.clone()
    }
}

impl<T, W> Watchable<T> for Throttled<T, W>
where
    T: Clone + PartialEq + 'static,
    W: Watchable<T> + Clone + 'static,
{
    fn read(&self) -> WatchableResult<T> {
        self.inner.registry.assert_not_dispatching_dirty()?;
        if self.inner.registry.is_dirty() {
            self.inner.registry.clear_dirty();
            let value = self.inner.source.read()?;
            *self.inner.cached.borrow_mut() = Some(value.clone());
            Ok(value)
        } else {
            Ok(self
                .inner
                .cached
                .borrow()
                .clone()
                .expect("clean throttled value must have a cached result"))
        }
    }

    fn subscribe_dirty(&self, listener: &Listener) -> UnsubscribeHandle {
        self.inner.registry.subscribe_dirty(listener)
    }

    fn subscribe_change(&self, listener: &Listener) -> UnsubscribeHandle {
        self.inner.registry.subscribe_change(listener)
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

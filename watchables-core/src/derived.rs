//! L2: lazy, cached, dependency-tracked computation (spec §4.4).
//!
//! This module owns the core recomputation algorithm — the ordered
//! fast-path equality walk, the slow-path dependency re-collection, and the
//! dirty/change propagation rules — as a small set of `pub(crate)` building
//! blocks ([`RecomputeState`], [`WatchContext`], [`recompute`],
//! [`on_dependency_dirty`], [`on_dependency_change`]) so that
//! [`crate::passive::PassiveDerived`] can reuse the exact same algorithm
//! while only varying subscription lifecycle around it, rather than
//! duplicating it.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::error::{panic_message, WatchableError, WatchableResult};
use crate::listener::{Listener, UnsubscribeHandle};
use crate::registry::ListenerRegistry;
use crate::watchable::Watchable;

/// Type-erased link from a derived value to one of the watchables it read
/// during its last computation (spec's `Dependency` record).
pub(crate) trait DependencyEntry {
    /// Re-read the source and compare it to the value observed at the
    /// last recomputation, without updating the stored value.
    fn unchanged(&self) -> WatchableResult<bool>;
    fn ensure_dirty_subscribed(&self, owner_dirty: &Listener);
    fn ensure_change_subscribed(&self, owner_change: &Listener);
    fn unsubscribe_dirty(&self);
    fn unsubscribe_change(&self);
    #[allow(dead_code)]
    fn identity(&self) -> usize;
}

struct TypedDependency<T, W> {
    source: W,
    last_observed_value: T,
    dirty_handle: RefCell<Option<UnsubscribeHandle>>,
    change_handle: RefCell<Option<UnsubscribeHandle>>,
}

impl<T, W> DependencyEntry for TypedDependency<T, W>
where
    T: Clone + PartialEq + 'static,
    W: Watchable<T> + 'static,
{
    fn unchanged(&self) -> WatchableResult<bool> {
        let current = self.source.read()?;
        Ok(current == self.last_observed_value)
    }

    fn ensure_dirty_subscribed(&self, owner_dirty: &Listener) {
        let mut handle = self.dirty_handle.borrow_mut();
        if handle.is_none() {
            *handle = Some(self.source.subscribe_dirty(owner_dirty));
        }
    }

    fn ensure_change_subscribed(&self, owner_change: &Listener) {
        let mut handle = self.change_handle.borrow_mut();
        if handle.is_none() {
            *handle = Some(self.source.subscribe_change(owner_change));
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

    fn identity(&self) -> usize {
        self.source.identity()
    }
}

type DepList = SmallVec<[Box<dyn DependencyEntry>; 4]>;

/// Cached value, dirty-independent recomputation bookkeeping, and the
/// ordered dependency list shared by [`crate::derived::DerivedValue`] and
/// [`crate::passive::PassiveDerived`].
pub(crate) struct RecomputeState<T> {
    value: RefCell<Option<T>>,
    initialized: Cell<bool>,
    deps: RefCell<DepList>,
    computation_id: Rc<Cell<u64>>,
}

impl<T: Clone> RecomputeState<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: RefCell::new(None),
            initialized: Cell::new(false),
            deps: RefCell::new(SmallVec::new()),
            computation_id: Rc::new(Cell::new(0)),
        }
    }

    pub(crate) fn cached(&self) -> T {
        self.value
            .borrow()
            .clone()
            .expect("recompute state read before first successful computation")
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.deps.borrow().len()
    }

    /// Bring every current dependency's live subscriptions in line with
    /// `active`: installs missing dirty+change subscriptions if `true`,
    /// tears down existing ones if `false`. Used by
    /// [`crate::passive::PassiveDerived`] to implement its listener-count
    /// driven subscribe/detach lifecycle (spec §4.6).
    pub(crate) fn sync_dependency_subscriptions(
        &self,
        active: bool,
        dirty_listener: &Listener,
        change_listener: &Listener,
    ) {
        for dep in self.deps.borrow().iter() {
            if active {
                dep.ensure_dirty_subscribed(dirty_listener);
                dep.ensure_change_subscribed(change_listener);
            } else {
                dep.unsubscribe_dirty();
                dep.unsubscribe_change();
            }
        }
    }
}

/// Passed to every `compute` closure. `watch(dep)` reads `dep`, registers
/// it as an ordered dependency of the computation in progress (unless this
/// exact source was already watched earlier in the same computation, or a
/// nested recomputation has since begun), and installs fresh dirty/change
/// subscriptions routed back to the owning derived value.
pub struct WatchContext {
    computation_id: Rc<Cell<u64>>,
    computation_id_at_entry: u64,
    owner_dirty: Listener,
    owner_change: Listener,
    collected: Vec<Box<dyn DependencyEntry>>,
    seen: HashSet<usize>,
}

impl WatchContext {
    fn new(
        computation_id: Rc<Cell<u64>>,
        owner_dirty: Listener,
        owner_change: Listener,
    ) -> Self {
        let computation_id_at_entry = computation_id.get();
        Self {
            computation_id,
            computation_id_at_entry,
            owner_dirty,
            owner_change,
            collected: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Read `dep` and, if this computation is still the live one and `dep`
    /// has not already been watched this pass, register it as a
    /// dependency with fresh subscriptions.
    pub fn watch<T, W>(&mut self, dep: &W) -> WatchableResult<T>
    where
        T: Clone + PartialEq + 'static,
        W: Watchable<T> + Clone + 'static,
    {
        let value = dep.read()?;

        if self.computation_id.get() != self.computation_id_at_entry {
            return Ok(value);
        }

        let id = dep.identity();
        if !self.seen.insert(id) {
            return Ok(value);
        }

        let dirty_handle = dep.subscribe_dirty(&self.owner_dirty);
        let change_handle = dep.subscribe_change(&self.owner_change);
        self.collected.push(Box::new(TypedDependency {
            source: dep.clone(),
            last_observed_value: value.clone(),
            dirty_handle: RefCell::new(Some(dirty_handle)),
            change_handle: RefCell::new(Some(change_handle)),
        }));

        Ok(value)
    }
}

/// The shape every `compute` closure has: read previously-watched inputs
/// through `watch`, see the previous result (`None` on the very first
/// computation), and produce the next value or propagate an error.
pub type ComputeFn<T> = dyn Fn(&mut WatchContext, Option<&T>) -> WatchableResult<T>;

/// Runs the two-phase recomputation algorithm from spec §4.4: clears
/// `dirty`, tries the ordered fast-path equality walk, and falls back to a
/// full recomputation (with fresh dependency collection) if any input
/// actually changed or this is the first computation.
pub(crate) fn recompute<T: Clone + PartialEq + 'static>(
    registry: &ListenerRegistry,
    state: &RecomputeState<T>,
    compute: &ComputeFn<T>,
    dirty_listener: &Listener,
    change_listener: &Listener,
) -> WatchableResult<T> {
    registry.clear_dirty();

    if state.initialized.get() {
        let deps = state.deps.borrow();
        let mut all_unchanged = true;
        for dep in deps.iter() {
            if !dep.unchanged()? {
                all_unchanged = false;
                break;
            }
        }
        if all_unchanged {
            for dep in deps.iter() {
                dep.ensure_dirty_subscribed(dirty_listener);
                dep.ensure_change_subscribed(change_listener);
            }
            drop(deps);
            tracing::trace!("fast-path: no dependency changed, skipping compute");
            return Ok(state.cached());
        }
    }

    tracing::trace!("slow-path: recomputing");
    state.computation_id.set(state.computation_id.get() + 1);
    for dep in state.deps.borrow().iter() {
        dep.unsubscribe_change();
    }
    state.deps.borrow_mut().clear();

    let mut ctx = WatchContext::new(
        state.computation_id.clone(),
        dirty_listener.clone(),
        change_listener.clone(),
    );
    let previous = state.value.borrow().clone();

    let outcome = catch_unwind(AssertUnwindSafe(|| compute(&mut ctx, previous.as_ref())));

    match outcome {
        Ok(Ok(new_value)) => {
            let mut deps: DepList = SmallVec::new();
            deps.extend(ctx.collected);
            *state.deps.borrow_mut() = deps;
            *state.value.borrow_mut() = Some(new_value.clone());
            state.initialized.set(true);
            Ok(new_value)
        }
        Ok(Err(e)) => {
            registry.mark_dirty_bit();
            Err(e)
        }
        Err(payload) => {
            registry.mark_dirty_bit();
            Err(WatchableError::ComputationFailure(panic_message(payload)))
        }
    }
}

/// Dirty propagation (spec §4.4 "Dirty propagation (receiving)"): one
/// dirty event carries no more information than the next, so dirty
/// subscriptions to every current dependency are torn down as soon as the
/// first one fires, and the registry's own `dirty` bit coalesces any
/// further dirty events until the next read.
pub(crate) fn on_dependency_dirty<T>(state: &RecomputeState<T>, registry: &ListenerRegistry) {
    for dep in state.deps.borrow().iter() {
        dep.unsubscribe_dirty();
    }
    registry.broadcast_dirty();
}

/// Change propagation (spec §4.4 "Change propagation (receiving)"): only
/// acts if still dirty (i.e. not yet re-read since the dirty event that
/// preceded this change).
pub(crate) fn on_dependency_change<T>(state: &RecomputeState<T>, registry: &ListenerRegistry) {
    if registry.is_dirty() {
        for dep in state.deps.borrow().iter() {
            dep.unsubscribe_change();
        }
        registry.broadcast_change();
    }
}

struct DerivedValueInner<T> {
    compute: Box<ComputeFn<T>>,
    state: RecomputeState<T>,
    registry: ListenerRegistry,
    dirty_listener: Listener,
    change_listener: Listener,
}

/// Lazy, cached, dependency-tracked derived value (spec §4.4).
pub struct DerivedValue<T>(Rc<DerivedValueInner<T>>);

impl<T> Clone for DerivedValue<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + PartialEq + 'static> DerivedValue<T> {
    /// `compute` is assumed pure modulo the watched inputs: on a pure
    /// re-evaluation it must call `watch` in the same order every time, so
    /// the fast-path equality walk in [`recompute`] stays sound.
    pub fn new(
        compute: impl Fn(&mut WatchContext, Option<&T>) -> WatchableResult<T> + 'static,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<DerivedValueInner<T>>| {
            let w_dirty = weak.clone();
            let dirty_listener: Listener = Rc::new(move || {
                if let Some(inner) = w_dirty.upgrade() {
                    on_dependency_dirty(&inner.state, &inner.registry);
                }
            });
            let w_change = weak.clone();
            let change_listener: Listener = Rc::new(move || {
                if let Some(inner) = w_change.upgrade() {
                    on_dependency_change(&inner.state, &inner.registry);
                }
            });

            DerivedValueInner {
                compute: Box::new(compute),
                state: RecomputeState::new(),
                // Starts dirty so the first read forces computation.
                registry: ListenerRegistry::new(true),
                dirty_listener,
                change_listener,
            }
        });
        Self(inner)
    }

    pub fn dependency_count(&self) -> usize {
        self.0.state.dependency_count()
    }

    pub fn dirty_subscriber_count(&self) -> usize {
        self.0.registry.dirty_subscriber_count()
    }

    pub fn change_subscriber_count(&self) -> usize {
        self.0.registry.change_subscriber_count()
    }
}

impl<T: Clone + PartialEq + 'static> Watchable<T> for DerivedValue<T> {
    fn read(&self) -> WatchableResult<T> {
        self.0.registry.assert_not_dispatching_dirty()?;
        if self.0.registry.is_dirty() {
            recompute(
                &self.0.registry,
                &self.0.state,
                &*self.0.compute,
                &self.0.dirty_listener,
                &self.0.change_listener,
            )
        } else {
            Ok(self.0.state.cached())
        }
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
    use crate::field::Field;
    use std::cell::Cell as StdCell;

    #[test]
    fn basic_propagation() {
        let f = Field::new(0);
        let f_clone = f.clone();
        let d = DerivedValue::new(move |watch, _prev| Ok(watch.watch(&f_clone)? * 2));

        assert_eq!(d.read().unwrap(), 0);
        f.set(3).commit().unwrap();
        assert_eq!(d.read().unwrap(), 6);
    }

    #[test]
    fn zero_dependency_derived_computes_once() {
        let calls = Rc::new(StdCell::new(0));
        let calls_clone = calls.clone();
        let d = DerivedValue::new(move |_watch, _prev| {
            calls_clone.set(calls_clone.get() + 1);
            Ok(42)
        });
        assert_eq!(d.read().unwrap(), 42);
        assert_eq!(d.read().unwrap(), 42);
        assert_eq!(d.read().unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn fast_path_skips_compute_when_nothing_changed() {
        let f = Field::new(1);
        let calls = Rc::new(StdCell::new(0));
        let calls_clone = calls.clone();
        let f_clone = f.clone();
        let d = DerivedValue::new(move |watch, _prev| {
            calls_clone.set(calls_clone.get() + 1);
            Ok(watch.watch(&f_clone)?)
        });

        assert_eq!(d.read().unwrap(), 1);
        assert_eq!(calls.get(), 1);

        // Setting the field to its own value is a complete no-op: no
        // dirty broadcast, so the derived value's dirty bit never flips.
        f.set(1).commit().unwrap();
        assert_eq!(d.read().unwrap(), 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn diamond_dependency_recomputes_consistently() {
        let s0 = Field::new(1);
        let s0a = s0.clone();
        let s1 = DerivedValue::new(move |w, _| w.watch(&s0a));

        let s0b = s0.clone();
        let s1a = s1.clone();
        let s2 = DerivedValue::new(move |w, _| Ok(w.watch(&s0b)? + w.watch::<i32, _>(&s1a)?));

        let s0c = s0.clone();
        let s1b = s1.clone();
        let s2a = s2.clone();
        let s3 = DerivedValue::new(move |w, _| {
            Ok(w.watch(&s0c)? + w.watch::<i32, _>(&s1b)? + w.watch::<i32, _>(&s2a)?)
        });

        let s0d = s0.clone();
        let s1c = s1.clone();
        let s2b = s2.clone();
        let s3a = s3.clone();
        let s4 = DerivedValue::new(move |w, _| {
            Ok(w.watch(&s0d)?
                + w.watch::<i32, _>(&s1c)?
                + w.watch::<i32, _>(&s2b)?
                + w.watch::<i32, _>(&s3a)?)
        });

        assert_eq!(s4.read().unwrap(), 8);

        let changes = Rc::new(StdCell::new(0));
        let changes_clone = changes.clone();
        let s4_for_listener = s4.clone();
        let observed: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));
        let observed_clone = observed.clone();
        let change_listener: Listener = Rc::new(move || {
            changes_clone.set(changes_clone.get() + 1);
            *observed_clone.borrow_mut() = Some(s4_for_listener.read().unwrap());
        });
        let _h = s4.subscribe_change(&change_listener);

        s0.set(2).commit().unwrap();
        assert_eq!(changes.get(), 1);
        assert_eq!(*observed.borrow(), Some(16));
        assert_eq!(s4.read().unwrap(), 16);
    }

    #[test]
    fn computation_failure_leaves_derived_dirty_for_retry() {
        let should_panic = Rc::new(StdCell::new(true));
        let should_panic_clone = should_panic.clone();
        let d: DerivedValue<i32> = DerivedValue::new(move |_w, _prev| {
            if should_panic_clone.get() {
                panic!("boom");
            }
            Ok(7)
        });

        let err = d.read().unwrap_err();
        assert!(matches!(err, WatchableError::ComputationFailure(_)));

        should_panic.set(false);
        assert_eq!(d.read().unwrap(), 7);
    }

    #[test]
    fn read_during_dirty_dispatch_fails() {
        let f = Field::new(0);
        let f_clone = f.clone();
        let d = DerivedValue::new(move |w, _| w.watch(&f_clone));
        d.read().unwrap();

        let d_clone = d.clone();
        let observed = Rc::new(StdCell::new(false));
        let observed_clone = observed.clone();
        let listener: Listener = Rc::new(move || {
            observed_clone.set(d_clone.read().is_err());
        });
        let _h = f.subscribe_dirty(&listener);

        f.set(1).commit().unwrap();
        assert!(observed.get());
    }
}

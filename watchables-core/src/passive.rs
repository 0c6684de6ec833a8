//! L2: a DerivedValue that detaches from its dependencies whenever it has
//! no listeners of its own (spec §4.6).
//!
//! Shares the recomputation algorithm with
//! [`crate::derived::DerivedValue`] via the `pub(crate)` building blocks in
//! [`crate::derived`] — the only difference is the subscription lifecycle
//! wrapped around it: subscriptions to dependencies are torn down whenever
//! this value's own live listener count drops to zero, and re-established
//! against the stored sources when it rises above zero again.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use crate::derived::{
    on_dependency_change, on_dependency_dirty, recompute, ComputeFn, RecomputeState, WatchContext,
};
use crate::error::WatchableResult;
use crate::listener::{Listener, UnsubscribeHandle};
use crate::registry::ListenerRegistry;
use crate::watchable::Watchable;

struct PassiveDerivedInner<T> {
    compute: Box<ComputeFn<T>>,
    state: RecomputeState<T>,
    registry: ListenerRegistry,
    dirty_listener: Listener,
    change_listener: Listener,
    /// Whether dependency subscriptions are currently installed, i.e.
    /// whether this value had at least one live listener as of the last
    /// subscription sync.
    active: Cell<bool>,
}

impl<T: Clone + PartialEq + 'static> PassiveDerivedInner<T> {
    fn sync_subscriptions(&self) {
        let want_active = self.registry.listener_count() > 0;
        self.active.set(want_active);
        self.state
            .sync_dependency_subscriptions(want_active, &self.dirty_listener, &self.change_listener);
    }

    fn recompute_now(&self) -> WatchableResult<T> {
        let result = recompute(
            &self.registry,
            &self.state,
            &*self.compute,
            &self.dirty_listener,
            &self.change_listener,
        );
        // Whatever recompute's slow path just subscribed to (it always
        // subscribes fresh dependencies unconditionally), bring back in
        // line with our own active/passive state.
        self.sync_subscriptions();
        result
    }
}

/// Like [`crate::derived::DerivedValue`], but detaches from its
/// dependencies while unwatched. While passive, every `read()` forces the
/// fast-path equality walk (the registry's own `dirty` bit cannot be
/// trusted, since dependency dirty events are not being delivered).
pub struct PassiveDerived<T>(Rc<PassiveDerivedInner<T>>);

impl<T> Clone for PassiveDerived<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + PartialEq + 'static> PassiveDerived<T> {
    pub fn new(
        compute: impl Fn(&mut WatchContext, Option<&T>) -> WatchableResult<T> + 'static,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<PassiveDerivedInner<T>>| {
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

            PassiveDerivedInner {
                compute: Box::new(compute),
                state: RecomputeState::new(),
                registry: ListenerRegistry::new(true),
                dirty_listener,
                change_listener,
                active: Cell::new(false),
            }
        });
        Self(inner)
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub fn dependency_count(&self) -> usize {
        self.0.state.dependency_count()
    }
}

impl<T: Clone + PartialEq + 'static> Watchable<T> for PassiveDerived<T> {
    fn read(&self) -> WatchableResult<T> {
        self.0.registry.assert_not_dispatching_dirty()?;
        if self.0.registry.is_dirty() || !self.0.active.get() {
            self.0.recompute_now()
        } else {
            Ok(self.0.state.cached())
        }
    }

    fn subscribe_dirty(&self, listener: &Listener) -> UnsubscribeHandle {
        let handle = self.0.registry.subscribe_dirty(listener);
        self.0.sync_subscriptions();
        let owner = self.0.clone();
        handle.with_extra(Rc::new(move || owner.sync_subscriptions()))
    }

    fn subscribe_change(&self, listener: &Listener) -> UnsubscribeHandle {
        let handle = self.0.registry.subscribe_change(listener);
        self.0.sync_subscriptions();
        let owner = self.0.clone();
        handle.with_extra(Rc::new(move || owner.sync_subscriptions()))
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

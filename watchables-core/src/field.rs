//! L1: a settable watchable with pluggable equality (spec §4.2).

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::WatchableResult;
use crate::listener::{Listener, UnsubscribeHandle};
use crate::mutator::Mutator;
use crate::registry::ListenerRegistry;
use crate::watchable::Watchable;

struct FieldInner<T> {
    value: RefCell<T>,
    equals: Box<dyn Fn(&T, &T) -> bool>,
    registry: ListenerRegistry,
}

/// Holds a direct value. `set` returns a [`Mutator`] whose perform phase
/// checks `equals(current, new_value)`: if equal, the mutator is a
/// complete no-op (no dirty, no assignment, no signal-work); otherwise it
/// broadcasts dirty and assigns on perform, then broadcasts change on
/// signal.
pub struct Field<T>(Rc<FieldInner<T>>);

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + 'static> Field<T> {
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, |a, b| a == b)
    }

    pub fn with_equality(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self(Rc::new(FieldInner {
            value: RefCell::new(value),
            equals: Box::new(equals),
            registry: ListenerRegistry::new(false),
        }))
    }

    /// Returns a [`Mutator`] that, on commit, updates the field's value
    /// (unless `equals` deems it unchanged) and notifies subscribers.
    pub fn set(&self, new_value: T) -> Mutator<()> {
        let inner = self.0.clone();
        let changed_cell: Rc<std::cell::Cell<bool>> = Rc::new(std::cell::Cell::new(false));
        let changed_perform = changed_cell.clone();

        let perform = move || {
            let unchanged = (inner.equals)(&inner.value.borrow(), &new_value);
            if unchanged {
                return;
            }
            inner.registry.broadcast_dirty();
            *inner.value.borrow_mut() = new_value;
            changed_perform.set(true);
        };

        let inner_signal = self.0.clone();
        let signal = move || {
            if changed_cell.get() {
                inner_signal.registry.broadcast_change();
            }
        };

        Mutator::new(perform, signal)
    }

    pub fn dirty_subscriber_count(&self) -> usize {
        self.0.registry.dirty_subscriber_count()
    }

    pub fn change_subscriber_count(&self) -> usize {
        self.0.registry.change_subscriber_count()
    }
}

impl<T: Clone + 'static> Watchable<T> for Field<T> {
    fn read(&self) -> WatchableResult<T> {
        self.0.registry.assert_not_dispatching_dirty()?;
        self.0.registry.clear_dirty();
        Ok(self.0.value.borrow().clone())
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

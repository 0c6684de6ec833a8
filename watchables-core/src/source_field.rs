//! L2: a field that may at any moment hold either a direct value or mirror
//! another watchable (spec §4.5).

use std::rc::Rc;

use crate::derived::DerivedValue;
use crate::error::WatchableResult;
use crate::field::Field;
use crate::listener::{Listener, UnsubscribeHandle};
use crate::mutator::Mutator;
use crate::watchable::Watchable;

/// Type-erased handle to an arbitrary `Watchable<T>`, cheap to clone (an
/// `Rc` around the trait object) so it can sit inside a `Field`'s value.
struct DynWatchable<T>(Rc<dyn Watchable<T>>);

impl<T> Clone for DynWatchable<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Watchable<T> for DynWatchable<T> {
    fn read(&self) -> WatchableResult<T> {
        self.0.read()
    }

    fn subscribe_dirty(&self, listener: &Listener) -> UnsubscribeHandle {
        self.0.subscribe_dirty(listener)
    }

    fn subscribe_change(&self, listener: &Listener) -> UnsubscribeHandle {
        self.0.subscribe_change(listener)
    }

    fn identity(&self) -> usize {
        self.0.identity()
    }
}

enum DirectOrSource<T> {
    Direct(T),
    Source(DynWatchable<T>),
}

impl<T: Clone> Clone for DirectOrSource<T> {
    fn clone(&self) -> Self {
        match self {
            DirectOrSource::Direct(v) => DirectOrSource::Direct(v.clone()),
            DirectOrSource::Source(w) => DirectOrSource::Source(w.clone()),
        }
    }
}

impl<T: PartialEq> PartialEq for DirectOrSource<T> {
    /// Direct-vs-direct uses the caller's value equality; source-vs-source
    /// uses reference equality on the mirrored watchable; a direct value
    /// and a source are never equal to each other.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DirectOrSource::Direct(a), DirectOrSource::Direct(b)) => a == b,
            (DirectOrSource::Source(a), DirectOrSource::Source(b)) => a.identity() == b.identity(),
            _ => false,
        }
    }
}

/// A field that may hold a direct value or mirror another [`Watchable`].
/// Built as a `DerivedValue` over an inner `Field<DirectOrSource<T>>`, so
/// it inherits the standard dirty/change protocol automatically.
pub struct SourceField<T> {
    inner: Field<DirectOrSource<T>>,
    derived: DerivedValue<T>,
}

impl<T> Clone for SourceField<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            derived: self.derived.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> SourceField<T> {
    pub fn new(value: T) -> Self {
        let inner = Field::with_equality(DirectOrSource::Direct(value), |a, b| a == b);
        let inner_for_compute = inner.clone();
        let derived = DerivedValue::new(move |watch, _previous| {
            match watch.watch(&inner_for_compute)? {
                DirectOrSource::Direct(v) => Ok(v),
                DirectOrSource::Source(w) => watch.watch(&w),
            }
        });
        Self { inner, derived }
    }

    /// Switch to holding `value` directly.
    pub fn set(&self, value: T) -> Mutator<()> {
        self.inner.set(DirectOrSource::Direct(value))
    }

    /// Switch to mirroring `source`: subsequent reads forward to it.
    pub fn set_source(&self, source: impl Watchable<T> + 'static) -> Mutator<()> {
        self.inner
            .set(DirectOrSource::Source(DynWatchable(Rc::new(source))))
    }
}

impl<T: Clone + PartialEq + 'static> Watchable<T> for SourceField<T> {
    fn read(&self) -> WatchableResult<T> {
        self.derived.read()
    }

    fn subscribe_dirty(&self, listener: &Listener) -> UnsubscribeHandle {
        self.derived.subscribe_dirty(listener)
    }

    fn subscribe_change(&self, listener: &Listener) -> UnsubscribeHandle {
        self.derived.subscribe_change(listener)
    }

    fn identity(&self) -> usize {
        self.derived.identity()
    }
}

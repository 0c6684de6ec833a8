//! L1: a watchable that never changes.

use std::rc::Rc;

use crate::error::WatchableResult;
use crate::listener::{dangling_handle, Listener, UnsubscribeHandle};
use crate::watchable::Watchable;

struct ConstantInner<T> {
    value: T,
}

/// A watchable whose value is fixed at construction. `subscribe_dirty`/
/// `subscribe_change` accept listeners (so generic code can treat it like
/// any other [`Watchable`]) but since the value never changes, those
/// listeners are simply never invoked.
pub struct Constant<T>(Rc<ConstantInner<T>>);

impl<T> Clone for Constant<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone> Constant<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(ConstantInner { value }))
    }
}

impl<T: Clone> Watchable<T> for Constant<T> {
    fn read(&self) -> WatchableResult<T> {
        Ok(self.0.value.clone())
    }

    fn subscribe_dirty(&self, _listener: &Listener) -> UnsubscribeHandle {
        dangling_handle()
    }

    fn subscribe_change(&self, _listener: &Listener) -> UnsubscribeHandle {
        dangling_handle()
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

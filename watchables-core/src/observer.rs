//! L3: a long-lived adaptor that turns change notifications into ordinary
//! callbacks carrying `(new, previous)` (spec §4.10).

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::panic_message;
use crate::listener::{Listener, UnsubscribeHandle};
use crate::watchable::Watchable;

type ObserverListener<T> = Rc<dyn Fn(&T, Option<&T>)>;

struct ObserverInner<T, W> {
    source: W,
    last_value: RefCell<Option<T>>,
    listeners: RefCell<Vec<ObserverListener<T>>>,
    /// Kept alive for the observer's whole lifetime: the registry only
    /// holds a `Weak` reference to it, so this strong `Rc` is what keeps
    /// the subscription alive until `destroy` is called explicitly.
    change_listener: RefCell<Option<Listener>>,
    change_handle: RefCell<Option<UnsubscribeHandle>>,
}

impl<T, W> ObserverInner<T, W>
where
    T: Clone + PartialEq + 'static,
    W: Watchable<T> + 'static,
{
    fn on_source_change(&self) {
        let Ok(new_value) = self.source.read() else {
            return;
        };
        let previous = self.last_value.borrow().clone();
        let changed = match &previous {
            Some(p) => *p != new_value,
            None => true,
        };
        if !changed {
            return;
        }
        *self.last_value.borrow_mut() = Some(new_value.clone());

        for listener in self.listeners.borrow().iter().cloned().collect::<Vec<_>>() {
            let new_value = new_value.clone();
            let previous = previous.clone();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                listener(&new_value, previous.as_ref())
            })) {
                tracing::error!(
                    message = %panic_message(payload),
                    "observer listener panicked; isolated, continuing"
                );
            }
        }
    }
}

/// Subscribes to `source`'s change channel for as long as it lives,
/// delivering `(new, previous)` to every registered listener, in
/// registration order, whenever the read value actually differs from the
/// last one observed.
pub struct Observer<T, W> {
    inner: Rc<ObserverInner<T, W>>,
}

impl<T, W> Clone for Observer<T, W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, W> Observer<T, W>
where
    T: Clone + PartialEq + 'static,
    W: Watchable<T> + Clone + 'static,
{
    pub fn new(source: W) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ObserverInner<T, W>>| {
            let w = weak.clone();
            let change_listener: Listener = Rc::new(move || {
                if let Some(inner) = w.upgrade() {
                    inner.on_source_change();
                }
            });
            ObserverInner {
                source,
                last_value: RefCell::new(None),
                listeners: RefCell::new(Vec::new()),
                change_listener: RefCell::new(Some(change_listener)),
                change_handle: RefCell::new(None),
            }
        });

        let handle = {
            let guard = inner.change_listener.borrow();
            let listener = guard.as_ref().expect("just constructed above");
            inner.source.subscribe_change(listener)
        };
        *inner.change_handle.borrow_mut() = Some(handle);

        Self { inner }
    }

    /// Register `listener`. If `deliver_initial` is true, it is invoked
    /// immediately with the source's current value and no previous value.
    pub fn add(self, listener: impl Fn(&T, Option<&T>) + 'static, deliver_initial: bool) -> Self {
        if deliver_initial {
            if let Ok(current) = self.inner.source.read() {
                listener(&current, None);
            }
        }
        self.inner.listeners.borrow_mut().push(Rc::new(listener));
        self
    }

    /// Stop observing. Idempotent.
    pub fn destroy(&self) {
        if let Some(h) = self.inner.change_handle.borrow_mut().take() {
            h.unsubscribe();
        }
        self.inner.change_listener.borrow_mut().take();
    }
}

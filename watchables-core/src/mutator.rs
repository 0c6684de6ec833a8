//! L1: the reified two-phase write (spec §4.3).
//!
//! A `Mutator<R>` packages "perform, then signal" so that writes can be
//! grouped: [`Mutator::chain`]/[`Mutator::chain_with`] run every performer
//! before any signaller, so no listener ever observes a partially-applied
//! group. Spec's abstract `carry` value passed from perform to signal is
//! not reified as a generic parameter here — each call site (e.g.
//! [`crate::field::Field::set`]) just closes over whatever shared,
//! interior-mutable state it needs between its own perform and signal
//! closures, which is the more idiomatic Rust shape for a one-shot,
//! type-erased two-stage callback pair.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{WatchableError, WatchableResult};

type PerformFn<R> = Box<dyn FnOnce() -> R>;
type SignalFn = Box<dyn FnOnce()>;

/// A reified, committable-once write.
pub struct Mutator<R> {
    perform: RefCell<Option<PerformFn<R>>>,
    signal: RefCell<Option<SignalFn>>,
    performed: Cell<bool>,
    signaled: Cell<bool>,
}

impl<R: 'static> Mutator<R> {
    pub fn new(
        perform: impl FnOnce() -> R + 'static,
        signal: impl FnOnce() + 'static,
    ) -> Self {
        Self {
            perform: RefCell::new(Some(Box::new(perform))),
            signal: RefCell::new(Some(Box::new(signal))),
            performed: Cell::new(false),
            signaled: Cell::new(false),
        }
    }

    /// Run the perform stage. Use is discouraged outside of `chain`'s
    /// implementation — prefer [`Mutator::commit`].
    pub fn perform(&self) -> WatchableResult<R> {
        let f = self
            .perform
            .borrow_mut()
            .take()
            .ok_or(WatchableError::MutationAlreadyConsumed)?;
        self.performed.set(true);
        Ok(f())
    }

    /// Run the signal stage. Use is discouraged outside of `chain`'s
    /// implementation — prefer [`Mutator::commit`].
    pub fn signal(&self) -> WatchableResult<()> {
        let f = self
            .signal
            .borrow_mut()
            .take()
            .ok_or(WatchableError::MutationAlreadyConsumed)?;
        self.signaled.set(true);
        f();
        Ok(())
    }

    /// Run perform then signal. Fails with `MutationAlreadyConsumed` if
    /// either stage already ran.
    pub fn commit(self) -> WatchableResult<R> {
        let r = self.perform()?;
        self.signal()?;
        Ok(r)
    }

    /// Alter only the reported result; perform/signal timing is unchanged.
    pub fn map<O: 'static>(self, f: impl FnOnce(R) -> O + 'static) -> Mutator<O> {
        let Mutator {
            perform,
            signal,
            performed,
            signaled,
        } = self;

        let new_perform = move || {
            let p = perform
                .borrow_mut()
                .take()
                .expect("perform stage already consumed");
            performed.set(true);
            f(p())
        };
        let new_signal = move || {
            let s = signal
                .borrow_mut()
                .take()
                .expect("signal stage already consumed");
            signaled.set(true);
            s();
        };
        Mutator::new(new_perform, new_signal)
    }

    /// The general form of `chain`: runs this mutator's perform stage,
    /// builds the next mutator from its result, runs the next mutator's
    /// perform stage too — all before either signal stage runs. Both
    /// signal stages then run in order. This is the atomicity primitive:
    /// no listener observes state between the two performs.
    pub fn chain_with<O: 'static>(
        self,
        f: impl FnOnce(R) -> Mutator<O> + 'static,
    ) -> Mutator<O> {
        let Mutator {
            perform,
            signal,
            performed,
            signaled,
        } = self;

        let next_holder: Rc<RefCell<Option<Mutator<O>>>> = Rc::new(RefCell::new(None));
        let next_holder_perform = next_holder.clone();

        let new_perform = move || -> O {
            let outer_perform = perform
                .borrow_mut()
                .take()
                .expect("perform stage already consumed");
            performed.set(true);
            let r = outer_perform();

            let next = f(r);
            let result = next
                .perform()
                .expect("freshly constructed mutator's perform stage cannot already be consumed");
            *next_holder_perform.borrow_mut() = Some(next);
            result
        };

        let new_signal = move || {
            let outer_signal = signal
                .borrow_mut()
                .take()
                .expect("signal stage already consumed");
            signaled.set(true);
            outer_signal();

            let next = next_holder
                .borrow_mut()
                .take()
                .expect("perform must run before signal");
            next.signal()
                .expect("freshly performed mutator's signal stage cannot already be consumed");
        };

        Mutator::new(new_perform, new_signal)
    }

    /// Sugar for `chain_with(move |_| next)`: runs `self` then `next`
    /// atomically, discarding `self`'s result.
    pub fn chain<O: 'static>(self, next: Mutator<O>) -> Mutator<O> {
        self.chain_with(move |_| next)
    }
}

/// A no-op mutator: `perform` and `signal` both do nothing.
pub fn dummy_mutator() -> Mutator<()> {
    Mutator::new(|| (), || ())
}

/// Combine a list of same-typed mutators into one atomic mutator whose
/// result is the vector of each stage's result, in order. An empty list
/// yields a no-op mutator producing an empty vector.
pub fn all<R: 'static>(mutators: Vec<Mutator<R>>) -> Mutator<Vec<R>> {
    let mut iter = mutators.into_iter();
    let Some(first) = iter.next() else {
        return dummy_mutator().map(|_| Vec::new());
    };

    let init: Mutator<Vec<R>> = first.map(|r| vec![r]);
    iter.fold(init, |acc, m| {
        acc.chain_with(move |mut v| {
            m.map(move |r| {
                v.push(r);
                v
            })
        })
    })
}

/// Imperative composition helper passed to [`chain`]'s builder closure.
/// Each `push(mutator)` call runs that mutator's perform stage immediately
/// (so the builder can branch on its result) and queues its signal stage
/// to run, in push order, once the whole builder has returned.
pub struct ChainBuilder {
    signals: RefCell<Vec<SignalFn>>,
}

impl ChainBuilder {
    fn new() -> Self {
        Self {
            signals: RefCell::new(Vec::new()),
        }
    }

    /// Run `mutator`'s perform stage now, return its result, and queue its
    /// signal stage for later.
    pub fn push<R: 'static>(&self, mutator: Mutator<R>) -> R {
        let r = mutator
            .perform()
            .expect("mutator passed to push() must not already be consumed");
        let signal_fn = mutator
            .signal
            .borrow_mut()
            .take()
            .expect("mutator passed to push() must not already be consumed");
        self.signals.borrow_mut().push(signal_fn);
        r
    }
}

/// Imperative mutator composition: `builder` receives a [`ChainBuilder`]
/// whose `push` method runs a mutator's perform stage immediately and
/// returns its result, while queueing the signal stage for later. All
/// queued signal stages run, in push order, after `builder` returns —
/// giving the same atomicity guarantee as [`Mutator::chain_with`] with an
/// imperative calling convention.
pub fn chain<T: 'static>(builder: impl FnOnce(&ChainBuilder) -> T + 'static) -> Mutator<T> {
    let builder_cell = Rc::new(RefCell::new(Some(builder)));
    let queue: Rc<ChainBuilder> = Rc::new(ChainBuilder::new());

    let queue_perform = queue.clone();
    let perform = move || -> T {
        let builder = builder_cell
            .borrow_mut()
            .take()
            .expect("chain() builder runs exactly once");
        builder(&queue_perform)
    };

    let signal = move || {
        for f in queue.signals.borrow_mut().drain(..) {
            f();
        }
    };

    Mutator::new(perform, signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn commit_runs_perform_then_signal() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_p = log.clone();
        let log_s = log.clone();
        let m = Mutator::new(
            move || {
                log_p.borrow_mut().push("perform");
                42
            },
            move || log_s.borrow_mut().push("signal"),
        );
        assert_eq!(m.commit().unwrap(), 42);
        assert_eq!(*log.borrow(), vec!["perform", "signal"]);
    }

    #[test]
    fn double_perform_fails() {
        let m = Mutator::new(|| (), || ());
        m.perform().unwrap();
        assert_eq!(
            m.perform().unwrap_err(),
            WatchableError::MutationAlreadyConsumed
        );
    }

    #[test]
    fn chain_runs_all_performs_before_any_signal() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let log1p = log.clone();
        let log1s = log.clone();
        let m1 = Mutator::new(
            move || log1p.borrow_mut().push("perform1"),
            move || log1s.borrow_mut().push("signal1"),
        );

        let log2p = log.clone();
        let log2s = log.clone();
        let m2 = Mutator::new(
            move || log2p.borrow_mut().push("perform2"),
            move || log2s.borrow_mut().push("signal2"),
        );

        m1.chain(m2).commit().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["perform1", "perform2", "signal1", "signal2"]
        );
    }

    #[test]
    fn map_alters_only_result() {
        let m = Mutator::new(|| 21, || ());
        let m = m.map(|r| r * 2);
        assert_eq!(m.commit().unwrap(), 42);
    }

    #[test]
    fn all_of_empty_is_dummy() {
        let m: Mutator<Vec<i32>> = all(Vec::new());
        assert_eq!(m.commit().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn all_collects_results_in_order() {
        let mutators = vec![
            Mutator::new(|| 1, || ()),
            Mutator::new(|| 2, || ()),
            Mutator::new(|| 3, || ()),
        ];
        let m = all(mutators);
        assert_eq!(m.commit().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn dummy_mutator_is_noop() {
        assert_eq!(dummy_mutator().commit().unwrap(), ());
    }

    #[test]
    fn chain_builder_runs_performs_eagerly_signals_after() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log1p = log.clone();
        let log1s = log.clone();
        let log2p = log.clone();
        let log2s = log.clone();

        let m = chain(move |push| {
            let a = push(Mutator::new(
                move || {
                    log1p.borrow_mut().push("perform1".to_string());
                    1
                },
                move || log1s.borrow_mut().push("signal1".to_string()),
            ));
            let b = push(Mutator::new(
                move || {
                    log2p.borrow_mut().push("perform2".to_string());
                    a + 1
                },
                move || log2s.borrow_mut().push("signal2".to_string()),
            ));
            b
        });

        assert_eq!(m.commit().unwrap(), 2);
        assert_eq!(*log.borrow(), vec!["perform1", "perform2", "signal1", "signal2"]);
    }
}

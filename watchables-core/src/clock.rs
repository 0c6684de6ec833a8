//! The only environmental dependency the core has: a millisecond timer
//! that can schedule a single-shot callback and be cancelled ([`Throttled`]
//! is its sole consumer).

use std::cell::RefCell;
use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A handle to a scheduled, cancellable, one-shot timer.
pub struct TimerHandle {
    id: u64,
    clock: Rc<dyn ClockInner>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.clock.cancel(self.id);
    }
}

trait ClockInner {
    fn cancel(&self, id: u64);
}

/// Schedules single-shot, cancellable callbacks after a delay.
pub trait Clock {
    /// Schedule `callback` to run after `delay`. Returns a handle that can
    /// cancel the timer before it fires.
    fn schedule(&self, delay: Duration, callback: Rc<dyn Fn()>) -> TimerHandle;
}

struct Entry {
    due: Instant,
    id: u64,
    callback: Rc<dyn Fn()>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}
impl Eq for Entry {}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest due time on top.
        other.due.cmp(&self.due).then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deterministic clock for tests: time only passes when [`ManualClock::advance`]
/// is called, and due callbacks run synchronously on that call.
#[derive(Clone)]
pub struct ManualClock {
    inner: Rc<ManualClockInner>,
}

struct ManualClockInner {
    now: RefCell<Instant>,
    next_id: RefCell<u64>,
    queue: RefCell<BinaryHeap<Entry>>,
    cancelled: RefCell<std::collections::HashSet<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ManualClockInner {
                now: RefCell::new(Instant::now()),
                next_id: RefCell::new(0),
                queue: RefCell::new(BinaryHeap::new()),
                cancelled: RefCell::new(std::collections::HashSet::new()),
            }),
        }
    }

    pub fn now(&self) -> Instant {
        *self.inner.now.borrow()
    }

    /// Advance the clock by `delta`, running (in due order) every callback
    /// whose deadline has now passed and was not cancelled.
    pub fn advance(&self, delta: Duration) {
        let target = *self.inner.now.borrow() + delta;
        loop {
            let next_due = self.inner.queue.borrow().peek().map(|e| e.due);
            match next_due {
                Some(due) if due <= target => {
                    *self.inner.now.borrow_mut() = due;
                    let entry = self.inner.queue.borrow_mut().pop().unwrap();
                    if !self.inner.cancelled.borrow_mut().remove(&entry.id) {
                        (entry.callback)();
                    }
                }
                _ => break,
            }
        }
        *self.inner.now.borrow_mut() = target;
    }

    /// Number of timers still pending (not yet fired or cancelled).
    pub fn pending_count(&self) -> usize {
        let cancelled = self.inner.cancelled.borrow();
        self.inner
            .queue
            .borrow()
            .iter()
            .filter(|e| !cancelled.contains(&e.id))
            .count()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockInner for ManualClockInner {
    fn cancel(&self, id: u64) {
        self.cancelled.borrow_mut().insert(id);
    }
}

impl Clock for ManualClock {
    fn schedule(&self, delay: Duration, callback: Rc<dyn Fn()>) -> TimerHandle {
        let id = {
            let mut next_id = self.inner.next_id.borrow_mut();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let due = *self.inner.now.borrow() + delay;
        self.inner.queue.borrow_mut().push(Entry { due, id, callback });
        TimerHandle {
            id,
            clock: self.inner.clone(),
        }
    }
}

/// Real-time clock with no background thread: `schedule` timestamps each
/// callback against `Instant::now() + delay` and [`ThreadClock::poll`] runs
/// whichever are due when called. The graph built on `Rc`/`RefCell` is not
/// `Send`, so there is nothing a separate thread could safely invoke
/// callbacks on anyway — the thread that owns the graph must call `poll`
/// periodically (e.g. once per event-loop tick) for timers to fire at all.
#[derive(Clone)]
pub struct ThreadClock {
    inner: Rc<ThreadClockInner>,
}

struct ThreadClockInner {
    next_id: RefCell<u64>,
    queue: RefCell<BinaryHeap<Entry>>,
    cancelled: RefCell<std::collections::HashSet<u64>>,
}

impl ThreadClock {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ThreadClockInner {
                next_id: RefCell::new(0),
                queue: RefCell::new(BinaryHeap::new()),
                cancelled: RefCell::new(std::collections::HashSet::new()),
            }),
        }
    }

    /// Run every callback whose deadline has passed. Must be called from
    /// the thread that owns the reactive graph.
    pub fn poll(&self) {
        let now = Instant::now();
        loop {
            let ready = {
                let mut queue = self.inner.queue.borrow_mut();
                match queue.peek() {
                    Some(entry) if entry.due <= now => queue.pop(),
                    _ => None,
                }
            };
            match ready {
                Some(entry) => {
                    if !self.inner.cancelled.borrow_mut().remove(&entry.id) {
                        (entry.callback)();
                    }
                }
                None => break,
            }
        }
    }
}

impl Default for ThreadClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockInner for ThreadClockInner {
    fn cancel(&self, id: u64) {
        self.cancelled.borrow_mut().insert(id);
    }
}

impl Clock for ThreadClock {
    fn schedule(&self, delay: Duration, callback: Rc<dyn Fn()>) -> TimerHandle {
        let id = {
            let mut next_id = self.inner.next_id.borrow_mut();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let due = Instant::now() + delay;
        self.inner.queue.borrow_mut().push(Entry { due, id, callback });
        TimerHandle {
            id,
            clock: self.inner.clone(),
        }
    }
}

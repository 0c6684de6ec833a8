//! Global dirty-dispatch reentrancy guard.
//!
//! Spec invariant `DirtyBeforeRead` requires that `read()` fail fast if a
//! dirty notification is being dispatched *anywhere in the graph*, not just
//! on the watchable being read. A single dirty broadcast is one synchronous
//! call chain (a field's dirty broadcast calls a dependent derived value's
//! dirty handler, which in turn broadcasts dirty to its own dependents,
//! and so on), so at any instant several [`crate::registry::ListenerRegistry`]
//! instances may have their own `dispatching_dirty` bit set at once. This
//! module tracks that cross-graph state with a depth counter, the same
//! thread-local-stack idiom the teacher crate uses for tracking the
//! currently-running computation (see the thread-local context stack
//! pattern).

use std::cell::Cell;

thread_local! {
    static DIRTY_DISPATCH_DEPTH: Cell<u32> = Cell::new(0);
}

/// RAII guard marking that a dirty broadcast is in flight. Incremented on
/// entry, decremented on drop (including on panic, so a panicking listener
/// cannot wedge the guard open).
pub(crate) struct DirtyDispatchGuard {
    _private: (),
}

impl DirtyDispatchGuard {
    pub(crate) fn enter() -> Self {
        DIRTY_DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self { _private: () }
    }
}

impl Drop for DirtyDispatchGuard {
    fn drop(&mut self) {
        DIRTY_DISPATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// True if any dirty broadcast is currently being dispatched anywhere on
/// this thread's graph.
pub(crate) fn is_dispatching_dirty() -> bool {
    DIRTY_DISPATCH_DEPTH.with(|depth| depth.get() > 0)
}

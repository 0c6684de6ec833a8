//! Error taxonomy for the reactive core.
//!
//! Every error here is programmer-visible; there is no silent recovery.
//! `ReadDuringDirtyDispatch` and `ComputationFailure` surface through
//! [`crate::Watchable::read`]; `MutationAlreadyConsumed` surfaces through
//! [`crate::Mutator`] methods.

use thiserror::Error;

/// Errors raised by the reactive core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchableError {
    /// A `read()` was attempted while a dirty notification was being
    /// dispatched anywhere in the graph (spec invariant `DirtyBeforeRead`).
    #[error("read() called while a dirty notification is being dispatched")]
    ReadDuringDirtyDispatch,

    /// A [`crate::Mutator`] stage (`perform`, `signal`, or `commit`) was
    /// invoked more than once, or `commit` was invoked after a stage had
    /// already run individually.
    #[error("mutator stage already consumed")]
    MutationAlreadyConsumed,

    /// A `compute` closure panicked during recomputation. The derived
    /// value is left dirty so the next `read` retries.
    #[error("compute closure panicked: {0}")]
    ComputationFailure(String),
}

/// Convenience alias used throughout the crate.
pub type WatchableResult<T> = Result<T, WatchableError>;

/// Extracts a human-readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

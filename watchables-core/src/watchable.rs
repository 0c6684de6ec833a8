//! The uniform capability set implemented by every value-producing entity
//! in the graph (spec §3).

use crate::error::WatchableResult;
use crate::listener::{Listener, UnsubscribeHandle};

/// A value whose changes can be subscribed to via the two-phase
/// dirty/change protocol.
///
/// Implementors are expected to be cheap to clone (a thin `Rc` handle) so
/// that the same watchable can be held by multiple dependents.
pub trait Watchable<T> {
    /// Read the current value. Recomputes lazily if dirty (for derived
    /// kinds); fails with [`crate::error::WatchableError::ReadDuringDirtyDispatch`]
    /// if a dirty notification is in flight anywhere in the graph.
    fn read(&self) -> WatchableResult<T>;

    /// Subscribe to the dirty channel. The listener is stored weakly; the
    /// caller must keep a strong reference alive for the subscription to
    /// matter.
    fn subscribe_dirty(&self, listener: &Listener) -> UnsubscribeHandle;

    /// Subscribe to the change channel. Same weak-storage discipline as
    /// `subscribe_dirty`.
    fn subscribe_change(&self, listener: &Listener) -> UnsubscribeHandle;

    /// A stable identity for this watchable (the address of its shared
    /// inner allocation), used for dependency-list de-duplication during a
    /// single recomputation and for reference-equality comparisons (e.g.
    /// [`crate::source_field::SourceField`]'s source-vs-source equality).
    fn identity(&self) -> usize;
}

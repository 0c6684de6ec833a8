//! watchables-core
//!
//! A reactive value graph: observable values (`Field`, `Constant`) and
//! derived values that are lazily evaluated, cached, and recomputed only
//! when a tracked dependency actually changed.
//!
//! Every watchable exposes two notification channels, dispatched in a
//! strict order: `dirty` (the value may be stale; carries no payload) and
//! `change` (the value has been confirmed to differ and can be re-read).
//! A dirty event for a given update always precedes its change event, and
//! no watchable delivers two dirty events, or two change events, for the
//! same update.
//!
//! # Example
//!
//! ```
//! use watchables_core::{DerivedValue, Field, Watchable};
//!
//! let width = Field::new(3);
//! let height = Field::new(4);
//!
//! let (w, h) = (width.clone(), height.clone());
//! let area = DerivedValue::new(move |watch, _previous| {
//!     Ok(watch.watch(&w)? * watch.watch(&h)?)
//! });
//!
//! assert_eq!(area.read().unwrap(), 12);
//! width.set(5).commit().unwrap();
//! assert_eq!(area.read().unwrap(), 20);
//! ```
//!
//! # Module layout
//!
//! - [`dispatch`], [`registry`], [`listener`]: the shared low-level
//!   machinery — the reentrancy guard, the dirty/change registry, and the
//!   weakly-held ordered subscriber set — embedded in every watchable.
//! - [`watchable`]: the `Watchable<T>` trait every primitive implements.
//! - [`mutator`]: reified, two-stage (perform/signal) writes, with
//!   combinators for composing several mutations into one atomic commit.
//! - [`constant`], [`field`]: the two plain observable-value primitives.
//! - [`derived`], [`passive`]: lazy, cached, dependency-tracked derived
//!   values, active and listener-gated.
//! - [`source_field`], [`equality_gate`]: derived-value compositions for
//!   switchable mirroring and change-cascade damping.
//! - [`counter`], [`throttle`], [`observer`]: a bare counter watchable, a
//!   period-rate-limiting adaptor, and a long-lived change-to-callback
//!   adaptor.
//! - [`clock`]: the sole environmental dependency (pluggable timers),
//!   needed only by [`throttle::Throttled`].
//! - [`error`]: the crate's error taxonomy.

pub mod clock;
pub mod constant;
pub mod counter;
pub mod derived;
pub mod dispatch;
pub mod equality_gate;
pub mod error;
pub mod field;
pub mod listener;
pub mod mutator;
pub mod observer;
pub mod passive;
pub mod registry;
pub mod source_field;
pub mod throttle;
pub mod watchable;

pub use clock::{Clock, ManualClock, ThreadClock, TimerHandle};
pub use constant::Constant;
pub use counter::Signal;
pub use derived::{ComputeFn, DerivedValue, WatchContext};
pub use equality_gate::equality_gate;
pub use error::{WatchableError, WatchableResult};
pub use field::Field;
pub use listener::{Listener, UnsubscribeHandle};
pub use mutator::{all, chain, dummy_mutator, ChainBuilder, Mutator};
pub use observer::Observer;
pub use passive::PassiveDerived;
pub use source_field::SourceField;
pub use throttle::Throttled;
pub use watchable::Watchable;

//! Reactive Primitives
//!
//! This module implements the reactive system: tracked objects, effects and
//! watches, all coordinated by a [`Runtime`].
//!
//! # Concepts
//!
//! ## Tracked Objects
//!
//! A [`Reactive`] is a key-value record. When one of its fields is read
//! while an effect is running, the effect is registered as a dependent of
//! that field. When the field is written, every dependent runs again.
//!
//! ## Effects
//!
//! An [`Effect`] is a computation that re-runs whenever a field it read
//! changes. Dependencies are re-collected on every run, so conditional
//! reads are handled precisely. An effect can be lazy, and it can hand
//! re-runs to a [`Scheduler`] instead of running directly.
//!
//! ## Watches
//!
//! A [`Watch`] is an effect that compares the old and new result of a getter
//! and reports both to a callback, either synchronously or after the current
//! turn ([`FlushMode`]).
//!
//! # Implementation Notes
//!
//! The active effect lives on an explicit execution context owned by the
//! runtime, not in ambient global state. The runtime never holds strong
//! references to tracked objects; it is keyed by [`ObjectId`].
//!
//! [`ObjectId`]: crate::graph::ObjectId

mod context;
mod effect;
mod object;
mod runtime;
mod scheduler;
mod value;
mod watch;

pub use context::{ContextGuard, ExecutionContext};
pub use effect::{Effect, EffectOptions, EffectRunner, Scheduler};
pub use object::{Field, Reactive};
pub use runtime::Runtime;
pub use scheduler::Job;
pub use value::Value;
pub use watch::{traverse, FlushMode, Watch, WatchOptions};

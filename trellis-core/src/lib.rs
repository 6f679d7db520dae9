//! Trellis Core
//!
//! This crate provides a reactive dependency-tracking runtime. Given mutable
//! records and computations that read from them, it:
//!
//! - discovers, at read time, which computations depend on which fields
//! - re-runs exactly those computations when one of the fields is written
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: object/effect identities and the dependency store
//! - `reactive`: tracked objects, effects, watches and the runtime that ties
//!   them together
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Runtime, WatchOptions};
//!
//! let runtime = Runtime::new();
//! let state = runtime.reactive([("count", 0)]);
//!
//! // Create an effect
//! let reader = state.clone();
//! runtime.effect(move || {
//!     println!("Count: {:?}", reader.get("count"));
//! });
//!
//! // Watch a derived value
//! let reader = state.clone();
//! let _watch = runtime.watch(
//!     move || reader.get("count").as_i64().unwrap_or(0) * 2,
//!     |old, new| println!("doubled: {old:?} -> {new}"),
//!     WatchOptions::default(),
//! );
//!
//! // Update the record
//! state.set("count", 5);
//! // Prints "Count: Int(5)" and "doubled: Some(0) -> 10"
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::{ReactiveError, Result};
pub use graph::{EffectId, ObjectId};
pub use reactive::{
    traverse, Effect, EffectOptions, EffectRunner, Field, FlushMode, Reactive, Runtime,
    Scheduler, Value, Watch, WatchOptions,
};

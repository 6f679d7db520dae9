//! Dependency Graph
//!
//! This module holds the bipartite dependency graph between tracked objects
//! and the effect runners that read them.
//!
//! # Overview
//!
//! - Sources are fields of tracked objects, named by a [`DepKey`].
//! - Dependents are effect runners, named by an [`EffectId`].
//! - An edge `(object, field) -> runner` exists iff the runner read that field
//!   during its most recent run.
//!
//! The forward direction lives in the [`DependencyStore`]. The reverse
//! direction (which keys a runner belongs to) lives on each runner, so a
//! runner can detach itself before it re-runs. The graph is rebuilt on every
//! run, which keeps branch-dependent reads accurate.

mod node;
mod store;

pub use node::{DepKey, EffectId, ObjectId};
pub use store::DependencyStore;

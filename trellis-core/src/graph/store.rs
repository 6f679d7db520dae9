//! Dependency Store
//!
//! The store maps each tracked object to its fields, and each field to the
//! ordered set of runners that read it during their latest run.
//!
//! # Invariants
//!
//! - A field entry exists only while at least one runner depends on it.
//!   Removing the last runner prunes the field, and removing the last field
//!   prunes the object. An empty set is therefore never observable.
//! - Sets preserve insertion order, which is the order `trigger` reports.
//! - The store is keyed by [`ObjectId`] and never owns the tracked object.
//!
//! The store is generic over the runner handle so it can be exercised
//! without a full runtime. Removal methods hand the removed handles back to
//! the caller. A handle may be the last reference to a runner, and dropping a
//! runner can drop tracked objects whose own cleanup re-enters the store, so
//! callers must release their lock before dropping what comes back.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::node::{EffectId, ObjectId};

type RunnerSet<R> = IndexMap<EffectId, R>;

/// Identity-keyed association from `(object, field)` to dependent runners.
pub struct DependencyStore<R> {
    targets: HashMap<ObjectId, IndexMap<String, RunnerSet<R>>>,
}

impl<R: Clone> DependencyStore<R> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            targets: HashMap::new(),
        }
    }

    /// Register `runner` as dependent on `(object, field)`.
    ///
    /// Returns `true` if the runner was newly added, `false` if it was
    /// already registered for this key.
    pub fn track(&mut self, object: ObjectId, field: &str, id: EffectId, runner: R) -> bool {
        let runners = self
            .targets
            .entry(object)
            .or_default()
            .entry(field.to_owned())
            .or_default();

        if runners.contains_key(&id) {
            return false;
        }
        runners.insert(id, runner);
        true
    }

    /// Collect every runner registered for `(object, field)`, except the one
    /// named by `exclude`.
    pub fn trigger(&self, object: ObjectId, field: &str, exclude: Option<EffectId>) -> Vec<R> {
        self.targets
            .get(&object)
            .and_then(|fields| fields.get(field))
            .map(|runners| {
                runners
                    .iter()
                    .filter(|(id, _)| Some(**id) != exclude)
                    .map(|(_, runner)| runner.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove one runner from `(object, field)`, pruning empty entries.
    pub fn untrack(&mut self, object: ObjectId, field: &str, id: EffectId) -> Option<R> {
        let fields = self.targets.get_mut(&object)?;
        let runners = fields.get_mut(field)?;
        let removed = runners.shift_remove(&id);

        if runners.is_empty() {
            fields.shift_remove(field);
        }
        if fields.is_empty() {
            self.targets.remove(&object);
        }
        removed
    }

    /// Drop every entry for `object`.
    ///
    /// Returns each affected runner once, in first-seen order.
    pub fn forget(&mut self, object: ObjectId) -> Vec<(EffectId, R)> {
        let Some(fields) = self.targets.remove(&object) else {
            return Vec::new();
        };

        let mut affected: IndexMap<EffectId, R> = IndexMap::new();
        for (_, runners) in fields {
            for (id, runner) in runners {
                affected.entry(id).or_insert(runner);
            }
        }
        affected.into_iter().collect()
    }

    /// Number of runners registered for `(object, field)`.
    pub fn dependent_count(&self, object: ObjectId, field: &str) -> usize {
        self.targets
            .get(&object)
            .and_then(|fields| fields.get(field))
            .map_or(0, |runners| runners.len())
    }

    /// Whether any field of `object` currently has dependents.
    pub fn is_tracked(&self, object: ObjectId) -> bool {
        self.targets.contains_key(&object)
    }

    /// Number of objects with at least one dependent field.
    pub fn object_count(&self) -> usize {
        self.targets.len()
    }
}

impl<R: Clone> Default for DependencyStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

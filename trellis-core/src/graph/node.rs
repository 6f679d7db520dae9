//! Graph Nodes
//!
//! Identities for the two kinds of node in the dependency graph: tracked
//! objects (sources) and effect runners (dependents). An edge is a
//! [`DepKey`] naming one field of one object.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a tracked object.
///
/// Objects are tracked by identity, so two records with identical contents
/// still get distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Generate a new unique object ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for ObjectId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Unique identifier for an effect runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    /// Generate a new unique effect ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

/// One edge source in the graph: a single field of a single object.
///
/// Effect runners keep a list of these so they can remove themselves from
/// the store before every re-run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepKey {
    pub object: ObjectId,
    pub field: String,
}

impl DepKey {
    pub fn new(object: ObjectId, field: impl Into<String>) -> Self {
        Self {
            object,
            field: field.into(),
        }
    }
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique() {
        let id1 = ObjectId::new();
        let id2 = ObjectId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn effect_ids_are_unique() {
        let id1 = EffectId::new();
        let id2 = EffectId::new();
        let id3 = EffectId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn dep_keys_compare_by_object_and_field() {
        let object = ObjectId::new();
        let other = ObjectId::new();

        assert_eq!(DepKey::new(object, "x"), DepKey::new(object, "x"));
        assert_ne!(DepKey::new(object, "x"), DepKey::new(object, "y"));
        assert_ne!(DepKey::new(object, "x"), DepKey::new(other, "x"));
    }

    #[test]
    fn dep_key_display_names_the_field() {
        let object = ObjectId::from(7);
        assert_eq!(DepKey::new(object, "count").to_string(), "object#7.count");
    }
}

//! Tracked Objects
//!
//! A [`Reactive`] is a plain key-value record whose field reads and writes
//! are observed by the runtime.
//!
//! # How Tracked Objects Work
//!
//! 1. Reading a field with [`Reactive::get`] records the active effect (if
//!    any) as a dependent of that field.
//!
//! 2. Writing a field with [`Reactive::set`] stores the value, then
//!    dispatches every dependent of that field except the effect currently
//!    running.
//!
//! 3. Reading or writing outside an effect is fine; tracking simply does
//!    nothing.
//!
//! # Ownership
//!
//! The record belongs to the application. The runtime only knows the
//! object's [`ObjectId`]. When the last handle is dropped, the object's
//! dependency entries are removed. [`Reactive::dispose`] removes them
//! early, which is needed when an effect closure itself keeps the object
//! alive.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{ReactiveError, Result};
use crate::graph::ObjectId;

use super::runtime::RuntimeInner;
use super::value::Value;

struct ObjectInner {
    id: ObjectId,
    fields: RwLock<IndexMap<String, Value>>,
    runtime: Weak<RuntimeInner>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.forget(self.id);
        }
    }
}

/// A tracked key-value record.
///
/// Cloning the handle shares the record; identity is preserved.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let state = runtime.reactive([("foo", 1), ("bar", 2)]);
///
/// // Read a field (tracked when inside an effect)
/// let foo = state.get("foo");
///
/// // Write a field (re-runs dependent effects)
/// state.set("foo", 5);
/// ```
#[derive(Clone)]
pub struct Reactive {
    inner: Arc<ObjectInner>,
}

impl Reactive {
    pub(crate) fn new(runtime: &Arc<RuntimeInner>, fields: IndexMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id: ObjectId::new(),
                fields: RwLock::new(fields),
                runtime: Arc::downgrade(runtime),
            }),
        }
    }

    /// The object's identity.
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Read a field, tracking it for the active effect.
    ///
    /// Missing fields read as [`Value::Undefined`] and are still tracked.
    pub fn get(&self, field: &str) -> Value {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.id, field);
        }
        self.get_untracked(field)
    }

    /// Read a field without establishing a dependency.
    pub fn get_untracked(&self, field: &str) -> Value {
        self.inner
            .fields
            .read()
            .get(field)
            .cloned()
            .unwrap_or_default()
    }

    /// Read a field (tracked) and convert it to `T`.
    pub fn get_as<T>(&self, field: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = ReactiveError>,
    {
        T::try_from(self.get(field))
    }

    /// Write a field and dispatch its dependents.
    pub fn set(&self, field: &str, value: impl Into<Value>) {
        let previous = self
            .inner
            .fields
            .write()
            .insert(field.to_owned(), value.into());
        // A replaced nested object may be dropped here, outside the lock.
        drop(previous);

        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.trigger(self.inner.id, field);
        }
    }

    /// Read a field (tracked), compute a new value from it, and write it back.
    pub fn update<F>(&self, field: &str, f: F)
    where
        F: FnOnce(Value) -> Value,
    {
        let next = f(self.get(field));
        self.set(field, next);
    }

    /// A read/write capability for a single field.
    pub fn field(&self, name: impl Into<String>) -> Field {
        Field {
            object: self.clone(),
            name: name.into(),
        }
    }

    /// Field names in insertion order. Not tracked.
    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.read().is_empty()
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.inner.fields.read().contains_key(field)
    }

    /// Remove every dependency entry for this object.
    ///
    /// The record stays usable; later reads inside effects track it again.
    pub fn dispose(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.forget(self.inner.id);
        }
    }

    /// Untracked JSON snapshot of the record.
    ///
    /// An object already being serialized higher up the tree (a cycle) is
    /// written as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut HashSet<ObjectId>) -> serde_json::Value {
        if !seen.insert(self.id()) {
            return serde_json::Value::Null;
        }

        let entries: Vec<(String, Value)> = self
            .inner
            .fields
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut map = serde_json::Map::with_capacity(entries.len());
        for (key, value) in entries {
            let json = match value {
                Value::Undefined => continue,
                Value::Null => serde_json::Value::Null,
                Value::Bool(b) => serde_json::Value::Bool(b),
                Value::Int(n) => serde_json::Value::from(n),
                Value::Float(n) => serde_json::Value::from(n),
                Value::Str(s) => serde_json::Value::String(s),
                Value::Object(object) => object.to_json_inner(seen),
            };
            map.insert(key, json);
        }

        seen.remove(&self.id());
        serde_json::Value::Object(map)
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("id", &self.id())
            .field("keys", &self.keys())
            .finish()
    }
}

/// One field of a tracked object, as a standalone read/write handle.
#[derive(Clone, Debug)]
pub struct Field {
    object: Reactive,
    name: String,
}

impl Field {
    /// Read the field, tracking it for the active effect.
    pub fn read(&self) -> Value {
        self.object.get(&self.name)
    }

    /// Write the field and dispatch its dependents.
    pub fn write(&self, value: impl Into<Value>) {
        self.object.set(&self.name, value);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object(&self) -> &Reactive {
        &self.object
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn get_and_set() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);

        assert_eq!(state.get("foo"), Value::Int(1));
        state.set("foo", 42);
        assert_eq!(state.get("foo"), Value::Int(42));
        assert!(state.get("missing").is_undefined());
    }

    #[test]
    fn update_reads_then_writes() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("n", 10)]);

        state.update("n", |v| Value::Int(v.as_i64().unwrap_or(0) + 5));
        assert_eq!(state.get_as::<i64>("n").unwrap(), 15);
    }

    #[test]
    fn get_as_reports_type_mismatch() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("name", "trellis")]);

        let err = state.get_as::<i64>("name").unwrap_err();
        assert!(matches!(err, ReactiveError::TypeMismatch { .. }));
        assert_eq!(state.get_as::<String>("name").unwrap(), "trellis");
    }

    #[test]
    fn clone_shares_identity() {
        let runtime = Runtime::new();
        let a = runtime.reactive([("x", 0)]);
        let b = a.clone();

        a.set("x", 1);
        assert_eq!(b.get("x"), Value::Int(1));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn identical_contents_are_distinct_objects() {
        let runtime = Runtime::new();
        let a = runtime.reactive([("x", 0)]);
        let b = runtime.reactive([("x", 0)]);

        assert_ne!(a.id(), b.id());
        assert_ne!(Value::from(&a), Value::from(&b));
    }

    #[test]
    fn field_handle_reads_and_writes() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("count", 0)]);
        let runs = Arc::new(AtomicI32::new(0));

        let count = state.field("count");
        assert_eq!(count.name(), "count");

        let runs_clone = runs.clone();
        let count_clone = count.clone();
        let _effect = runtime.effect(move || {
            count_clone.read();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        count.write(3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(count.object().get("count"), Value::Int(3));
    }

    #[test]
    fn dropping_object_forgets_its_entries() {
        let runtime = Runtime::new();
        let watched = runtime.reactive([("x", 1)]);

        // The effect reads through a Field that the test drops afterwards,
        // so only the test's handle keeps the object alive.
        let slot = Arc::new(parking_lot::Mutex::new(Some(watched.field("x"))));
        let slot_clone = slot.clone();
        let effect = runtime.effect(move || {
            if let Some(field) = slot_clone.lock().as_ref() {
                field.read();
            }
        });
        assert_eq!(runtime.tracked_object_count(), 1);
        assert_eq!(effect.dependency_count(), 1);

        slot.lock().take();
        drop(watched);

        assert_eq!(runtime.tracked_object_count(), 0);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn dispose_removes_entries_but_keeps_record() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("x", 1)]);
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let state_clone = state.clone();
        let effect = runtime.effect(move || {
            state_clone.get("x");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        state.dispose();
        assert_eq!(runtime.tracked_object_count(), 0);
        assert_eq!(effect.dependency_count(), 0);

        state.set("x", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(state.get("x"), Value::Int(2));
    }

    #[test]
    fn to_json_snapshots_nested_and_cyclic_records() {
        let runtime = Runtime::new();
        let child = runtime.reactive([("leaf", true)]);
        let parent = runtime.reactive([("name", Value::from("root")), ("child", Value::from(&child))]);
        child.set("parent", &parent);

        let json = parent.to_json();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "root",
                "child": { "leaf": true, "parent": null }
            })
        );

        // Break the cycle so both records can be reclaimed
        child.set("parent", Value::Null);
    }
}

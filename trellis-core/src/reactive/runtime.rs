//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects tracked objects,
//! effects and watches. One `Runtime` value is one reactive universe. It owns
//! the dependency store, the execution context and the post-flush job queue,
//! and several runtimes can coexist in a process without interfering.
//!
//! # How It Works
//!
//! 1. When an effect runs, it pushes itself onto the runtime's execution
//!    context.
//!
//! 2. When a tracked object's field is read, the runtime records the active
//!    effect as a dependent of `(object, field)`.
//!
//! 3. When a field is written, the runtime:
//!    a. Collects the dependents of `(object, field)`, minus the active effect
//!    b. Hands each one to its scheduler, or runs it directly
//!
//! # Turns
//!
//! Deferred (`post`) jobs run when the current turn ends. [`Runtime::turn`]
//! opens an explicit turn. A write made outside any turn is its own turn, and
//! so is a top-level effect run. Nothing is drained while an effect is still
//! running; the outermost run drains on its way out.
//!
//! # Locking
//!
//! Internal locks are held only for bookkeeping and never while user code
//! runs. Handles removed from the store are dropped after its lock is
//! released.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{ReactiveError, Result};
use crate::graph::{DepKey, DependencyStore, EffectId, ObjectId};

use super::context::ExecutionContext;
use super::effect::{dispatch, Effect, EffectOptions, EffectRef, EffectRunner};
use super::object::Reactive;
use super::scheduler::{Job, JobQueue};
use super::value::Value;

pub(crate) struct RuntimeInner {
    pub(crate) store: Mutex<DependencyStore<EffectRef>>,
    pub(crate) context: ExecutionContext<EffectRef>,
    pub(crate) jobs: JobQueue,
}

impl RuntimeInner {
    fn new() -> Self {
        Self {
            store: Mutex::new(DependencyStore::new()),
            context: ExecutionContext::new(),
            jobs: JobQueue::new(),
        }
    }

    /// Record the active effect as a dependent of `(object, field)`.
    pub(crate) fn track(&self, object: ObjectId, field: &str) {
        let Some((id, runner)) = self.context.current() else {
            return;
        };
        if runner.is_stopped() {
            return;
        }

        let inserted = self.store.lock().track(object, field, id, runner.clone());
        if inserted {
            runner.record_dep(DepKey::new(object, field));
            tracing::trace!(%object, field, effect = %id, "track");
        }
    }

    /// Dependents of `(object, field)`, excluding the active effect.
    pub(crate) fn dependents(&self, object: ObjectId, field: &str) -> Vec<EffectRef> {
        let active = self.context.current_id();
        self.store.lock().trigger(object, field, active)
    }

    /// Dispatch every dependent of `(object, field)` as one turn.
    pub(crate) fn trigger(&self, object: ObjectId, field: &str) {
        let runners = self.dependents(object, field);
        if !runners.is_empty() {
            tracing::trace!(%object, field, count = runners.len(), "trigger");

            let _turn = self.jobs.enter_turn();
            for runner in runners {
                dispatch(runner);
            }
        }
        self.flush_if_idle();
    }

    /// Drain deferred jobs unless a turn is open or an effect is running.
    pub(crate) fn flush_if_idle(&self) -> usize {
        if self.jobs.in_turn() || self.context.is_active() {
            return 0;
        }
        self.flush_jobs()
    }

    pub(crate) fn flush_jobs(&self) -> usize {
        let ran = self.jobs.flush();
        if ran > 0 {
            tracing::debug!(jobs = ran, "flushed deferred jobs");
        }
        ran
    }

    /// Remove `effect` from the dependency set of each key.
    pub(crate) fn untrack_all<I>(&self, effect: EffectId, keys: I)
    where
        I: IntoIterator<Item = DepKey>,
    {
        let removed: Vec<EffectRef> = {
            let mut store = self.store.lock();
            keys.into_iter()
                .filter_map(|key| store.untrack(key.object, &key.field, effect))
                .collect()
        };
        drop(removed);
    }

    /// Drop every dependency entry for `object`.
    pub(crate) fn forget(&self, object: ObjectId) {
        let affected = self.store.lock().forget(object);
        if affected.is_empty() {
            return;
        }

        tracing::debug!(%object, effects = affected.len(), "forget tracked object");
        for (_, runner) in &affected {
            runner.release_object(object);
        }
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        let pending = self.jobs.len();
        if pending > 0 {
            tracing::warn!(jobs = pending, "runtime dropped with deferred jobs still queued");
        }
    }
}

/// Handle to one reactive universe.
///
/// Cloning the handle shares the runtime.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let state = runtime.reactive([("count", 0)]);
///
/// let state_clone = state.clone();
/// runtime.effect(move || println!("count = {:?}", state_clone.get("count")));
///
/// state.set("count", 1); // The effect re-runs
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a new, empty runtime.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner::new()),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<RuntimeInner> {
        &self.inner
    }

    // ------------------------------------------------------------------
    // Tracked objects
    // ------------------------------------------------------------------

    /// Wrap a set of fields in a tracked object.
    pub fn reactive<K, V, I>(&self, fields: I) -> Reactive
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Reactive::new(&self.inner, fields)
    }

    /// Build a tracked object from a JSON object.
    ///
    /// Nested objects become nested tracked objects. Arrays become tracked
    /// objects keyed by index.
    pub fn reactive_from_json(&self, json: &serde_json::Value) -> Result<Reactive> {
        match json {
            serde_json::Value::Object(map) => Ok(self.object_from_json(
                map.iter().map(|(key, value)| (key.clone(), value)),
            )),
            other => Err(ReactiveError::NotAnObject(json_type_name(other))),
        }
    }

    /// Parse `source` as JSON and build a tracked object from it.
    pub fn reactive_from_str(&self, source: &str) -> Result<Reactive> {
        let json: serde_json::Value = serde_json::from_str(source)?;
        self.reactive_from_json(&json)
    }

    fn object_from_json<'a, I>(&self, entries: I) -> Reactive
    where
        I: IntoIterator<Item = (String, &'a serde_json::Value)>,
    {
        let fields: IndexMap<String, Value> = entries
            .into_iter()
            .map(|(key, value)| (key, self.value_from_json(value)))
            .collect();
        Reactive::new(&self.inner, fields)
    }

    fn value_from_json(&self, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::Object(self.object_from_json(
                items.iter().enumerate().map(|(i, item)| (i.to_string(), item)),
            )),
            serde_json::Value::Object(map) => Value::Object(self.object_from_json(
                map.iter().map(|(key, value)| (key.clone(), value)),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Register an effect and run it once immediately.
    pub fn effect<T, F>(&self, compute: F) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.effect_with(compute, EffectOptions::default())
    }

    /// Register an effect with explicit options.
    pub fn effect_with<T, F>(&self, compute: F, options: EffectOptions) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Effect::new(&self.inner, compute, options)
    }

    // ------------------------------------------------------------------
    // Low-level tracking
    // ------------------------------------------------------------------

    /// Record the active effect as depending on `(object, field)`.
    ///
    /// A no-op when no effect is running.
    pub fn track(&self, object: ObjectId, field: &str) {
        self.inner.track(object, field);
    }

    /// Dispatch every effect that depends on `(object, field)`.
    pub fn trigger(&self, object: ObjectId, field: &str) {
        self.inner.trigger(object, field);
    }

    /// Effects a write to `(object, field)` would dispatch right now.
    pub fn dependents(&self, object: ObjectId, field: &str) -> Vec<EffectRunner> {
        self.inner
            .dependents(object, field)
            .into_iter()
            .map(EffectRunner::from_ref)
            .collect()
    }

    /// Number of effects registered for `field` of `object`.
    pub fn dependent_count(&self, object: &Reactive, field: &str) -> usize {
        self.inner.store.lock().dependent_count(object.id(), field)
    }

    /// Number of objects with at least one tracked field.
    pub fn tracked_object_count(&self) -> usize {
        self.inner.store.lock().object_count()
    }

    /// The effect currently executing, if any.
    pub fn active_effect(&self) -> Option<EffectId> {
        self.inner.context.current_id()
    }

    /// Whether an effect is currently executing.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_active()
    }

    // ------------------------------------------------------------------
    // Turns and deferred jobs
    // ------------------------------------------------------------------

    /// Run `f` as one synchronous turn.
    ///
    /// Jobs deferred during the turn run when the outermost turn returns,
    /// or, if `f` was called from inside an effect, when that effect's
    /// outermost run returns.
    pub fn turn<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = {
            let _turn = self.inner.jobs.enter_turn();
            f()
        };

        self.inner.flush_if_idle();
        result
    }

    /// Defer `job` until the current turn completes.
    ///
    /// A job queued outside any turn or effect waits for the next drain:
    /// the next top-level write, or an explicit [`Runtime::flush_jobs`].
    pub fn queue_job<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.jobs.push(Box::new(job) as Job);
    }

    /// Run every deferred job now, in the order they were queued.
    ///
    /// Returns the number of jobs that ran.
    pub fn flush_jobs(&self) -> usize {
        self.inner.flush_jobs()
    }

    /// Number of deferred jobs waiting to run.
    pub fn pending_jobs(&self) -> usize {
        self.inner.jobs.len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("tracked_objects", &self.tracked_object_count())
            .field("active_effect", &self.active_effect())
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

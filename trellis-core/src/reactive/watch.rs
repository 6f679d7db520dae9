//! Watch Implementation
//!
//! A Watch observes a derived value and calls back with the old and new
//! values whenever one of the fields it read changes.
//!
//! # How Watches Work
//!
//! A watch is a lazy effect around a getter, plus a scheduler. When a
//! dependency fires, the scheduler runs a *job*:
//!
//! 1. Re-run the getter (re-collecting dependencies) to get the new value.
//! 2. Call the callback with the previous value and the new one.
//! 3. Remember the new value as the next "old" value.
//!
//! With [`FlushMode::Sync`] the job runs inside the write. With
//! [`FlushMode::Post`] it is queued on the runtime and runs once the current
//! turn is over: at the end of [`Runtime::turn`], at the end of a write made
//! outside any turn, or when the outermost running effect returns.
//!
//! A job for a watch that was stopped or dropped before it ran does nothing.
//!
//! Each triggering write schedules its own job. Several writes in one turn
//! under `post` flush therefore produce several callbacks. All of them run
//! after the turn, and all of them see the final value as `new`.
//!
//! # Setup
//!
//! With `immediate` the job runs once at creation, and the callback sees no
//! old value. Otherwise the getter runs once silently to prime the old value
//! and the dependency set.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;
use crate::graph::ObjectId;

use super::effect::{Effect, EffectOptions, EffectRunner};
use super::object::Reactive;
use super::runtime::{Runtime, RuntimeInner};
use super::value::Value;

/// When a watch callback runs relative to the write that triggered it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Run inside the write.
    #[default]
    Sync,
    /// Run after the current turn completes. A write outside any turn and
    /// outside any effect is a turn of its own, so its jobs run before the
    /// write returns.
    Post,
}

impl FromStr for FlushMode {
    type Err = ReactiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(FlushMode::Sync),
            "post" => Ok(FlushMode::Post),
            other => Err(ReactiveError::InvalidFlushMode(other.to_owned())),
        }
    }
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushMode::Sync => f.write_str("sync"),
            FlushMode::Post => f.write_str("post"),
        }
    }
}

/// Options for [`Runtime::watch`].
///
/// Deserializes from `{"immediate": true, "flush": "post"}`; both keys are
/// optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Run the callback once at creation, with no old value.
    pub immediate: bool,
    /// See [`FlushMode`] for when `post` jobs drain.
    pub flush: FlushMode,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }
}

type Callback<T> = Box<dyn Fn(Option<&T>, &T) + Send + Sync>;

struct WatchInner<T: Send + 'static> {
    effect: Effect<T>,
    callback: Callback<T>,
    /// `None` until the first run, and while the callback is executing.
    old: Mutex<Option<T>>,
    flush: FlushMode,
}

impl<T: Send + 'static> WatchInner<T> {
    fn job(&self) {
        if self.effect.is_stopped() {
            return;
        }

        let new = self.effect.run();
        let mut slot = OldSlot {
            slot: &self.old,
            value: self.old.lock().take(),
        };

        tracing::debug!(effect = %self.effect.id(), flush = %self.flush, "watch callback");
        (self.callback)(slot.value.as_ref(), &new);

        slot.value = Some(new);
    }
}

/// Writes `value` back into the old-value slot on drop, so a panicking
/// callback leaves the previous value in place.
struct OldSlot<'a, T> {
    slot: &'a Mutex<Option<T>>,
    value: Option<T>,
}

impl<T> Drop for OldSlot<'_, T> {
    fn drop(&mut self) {
        *self.slot.lock() = self.value.take();
    }
}

impl<T: Send + 'static> Drop for WatchInner<T> {
    fn drop(&mut self) {
        self.effect.stop();
    }
}

fn schedule_job<T: Send + 'static>(
    watch: &Weak<WatchInner<T>>,
    runtime: &Weak<RuntimeInner>,
    flush: FlushMode,
) {
    match flush {
        FlushMode::Sync => {
            if let Some(watch) = watch.upgrade() {
                watch.job();
            }
        }
        FlushMode::Post => {
            let Some(runtime) = runtime.upgrade() else {
                return;
            };
            let watch = watch.clone();
            runtime.jobs.push(Box::new(move || {
                // Skipped if the watch was dropped before the flush.
                if let Some(watch) = watch.upgrade() {
                    watch.job();
                }
            }));
        }
    }
}

/// Handle to a running watch.
///
/// The watch lives as long as this handle. Dropping it, or calling
/// [`Watch::stop`], detaches the watch from its dependencies.
#[must_use = "dropping a Watch stops it"]
pub struct Watch<T: Send + 'static> {
    inner: Arc<WatchInner<T>>,
}

impl<T: Send + 'static> Watch<T> {
    /// Stop reacting to changes.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.effect.is_stopped()
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.inner.flush
    }

    /// The effect wrapping the getter.
    pub fn effect(&self) -> &Effect<T> {
        &self.inner.effect
    }
}

impl<T: Send + 'static> fmt::Debug for Watch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("effect", &self.inner.effect.id())
            .field("flush", &self.inner.flush)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Runtime {
    /// Watch the value computed by `getter`.
    ///
    /// `callback` receives the previous value (`None` on an immediate first
    /// call) and the new one. With [`FlushMode::Post`] the callback runs when
    /// the current turn ends; see [`FlushMode::Post`].
    pub fn watch<T, G, C>(&self, getter: G, callback: C, options: WatchOptions) -> Watch<T>
    where
        T: Send + 'static,
        G: Fn() -> T + Send + Sync + 'static,
        C: Fn(Option<&T>, &T) + Send + Sync + 'static,
    {
        let runtime = Arc::downgrade(self.inner());
        let flush = options.flush;

        let inner = Arc::new_cyclic(|weak: &Weak<WatchInner<T>>| {
            let watch = weak.clone();
            let scheduler = move |_runner: EffectRunner| schedule_job(&watch, &runtime, flush);

            WatchInner {
                effect: self.effect_with(getter, EffectOptions::new().lazy(true).scheduler(scheduler)),
                callback: Box::new(callback),
                old: Mutex::new(None),
                flush,
            }
        });

        if options.immediate {
            inner.job();
        } else {
            let initial = inner.effect.run();
            *inner.old.lock() = Some(initial);
        }

        Watch { inner }
    }

    /// Watch every field reachable from `source`, at any depth.
    ///
    /// Old and new are both `source` itself; the callback signals that
    /// something inside it changed.
    pub fn watch_deep<C>(&self, source: &Reactive, callback: C, options: WatchOptions) -> Watch<Reactive>
    where
        C: Fn(Option<&Reactive>, &Reactive) + Send + Sync + 'static,
    {
        let source = source.clone();
        self.watch(
            move || {
                traverse(&source);
                source.clone()
            },
            callback,
            options,
        )
    }
}

/// Read every field reachable from `object`, tracking each one.
///
/// Objects already visited during this traversal are skipped, so cyclic
/// graphs terminate.
pub fn traverse(object: &Reactive) {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut pending = vec![object.clone()];

    while let Some(current) = pending.pop() {
        if !seen.insert(current.id()) {
            continue;
        }
        for key in current.keys() {
            if let Value::Object(child) = current.get(&key) {
                pending.push(child);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type Calls = Arc<Mutex<Vec<(Option<i64>, i64)>>>;

    fn recorder() -> (Calls, impl Fn(Option<&i64>, &i64) + Send + Sync + 'static) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        (calls, move |old: Option<&i64>, new: &i64| {
            calls_clone.lock().push((old.copied(), *new));
        })
    }

    #[test]
    fn sync_watch_reports_old_and_new() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let _watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::default(),
        );

        // Priming does not call back
        assert!(calls.lock().is_empty());

        state.set("foo", 2);
        state.set("foo", 5);
        assert_eq!(*calls.lock(), vec![(Some(1), 2), (Some(2), 5)]);
    }

    #[test]
    fn immediate_calls_back_with_no_old_value() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let _watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::new().immediate(true),
        );

        assert_eq!(*calls.lock(), vec![(None, 1)]);
    }

    #[test]
    fn post_flush_defers_until_turn_ends() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::new().flush(FlushMode::Post),
        );
        assert_eq!(watch.flush_mode(), FlushMode::Post);

        runtime.turn(|| {
            state.set("foo", 2);
            assert!(calls.lock().is_empty());
            assert_eq!(runtime.pending_jobs(), 1);
        });

        assert_eq!(*calls.lock(), vec![(Some(1), 2)]);
    }

    #[test]
    fn post_flush_does_not_coalesce_writes() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 0)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let _watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::new().flush(FlushMode::Post),
        );

        runtime.turn(|| {
            state.set("foo", 1);
            state.set("foo", 2);
            assert_eq!(runtime.pending_jobs(), 2);
        });

        assert_eq!(runtime.pending_jobs(), 0);
        assert_eq!(*calls.lock(), vec![(Some(0), 2), (Some(2), 2)]);
    }

    #[test]
    fn dropping_watch_stops_it() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::default(),
        );
        assert_eq!(runtime.dependent_count(&state, "foo"), 1);

        drop(watch);
        assert_eq!(runtime.dependent_count(&state, "foo"), 0);

        state.set("foo", 2);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn queued_job_skips_dropped_watch() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::new().flush(FlushMode::Post),
        );

        runtime.turn(|| {
            state.set("foo", 2);
            drop(watch);
        });

        assert_eq!(runtime.pending_jobs(), 0);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn stop_skips_queued_post_job() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::new().flush(FlushMode::Post),
        );

        runtime.turn(|| {
            state.set("foo", 2);
            watch.stop();
        });

        assert_eq!(runtime.pending_jobs(), 0);
        assert!(calls.lock().is_empty());
        assert_eq!(watch.effect().run_count(), 1);
    }

    #[test]
    fn post_job_runs_when_write_outside_turn_returns() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let _watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::new().flush(FlushMode::Post),
        );

        state.set("foo", 2);
        assert_eq!(*calls.lock(), vec![(Some(1), 2)]);

        state.set("foo", 3);
        assert_eq!(*calls.lock(), vec![(Some(1), 2), (Some(2), 3)]);
        assert_eq!(runtime.pending_jobs(), 0);
    }

    #[test]
    fn post_job_waits_for_writing_effect_to_finish() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1), ("go", 0)]);
        let tracking_in_callback = Arc::new(Mutex::new(Vec::new()));

        let state_clone = state.clone();
        let observer = runtime.clone();
        let seen = tracking_in_callback.clone();
        let _watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            move |_: Option<&i64>, new: &i64| {
                seen.lock().push((*new, observer.is_tracking()));
            },
            WatchOptions::new().flush(FlushMode::Post),
        );

        let state_clone = state.clone();
        let writer_runtime = runtime.clone();
        let _writer = runtime.effect(move || {
            if state_clone.get("go").as_i64().unwrap_or(0) > 0 {
                state_clone.set("foo", 10);
                // Still queued while this effect runs
                assert_eq!(writer_runtime.pending_jobs(), 1);
            }
        });

        state.set("go", 1);
        assert_eq!(*tracking_in_callback.lock(), vec![(10, false)]);
    }

    #[test]
    fn panicking_callback_keeps_previous_old_value() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));

        let calls_clone = calls.clone();
        let fail_clone = fail.clone();
        let state_clone = state.clone();
        let _watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            move |old: Option<&i64>, new: &i64| {
                if fail_clone.swap(false, std::sync::atomic::Ordering::SeqCst) {
                    panic!("callback failed");
                }
                calls_clone.lock().push((old.copied(), *new));
            },
            WatchOptions::default(),
        );

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            state.set("foo", 2);
        }));
        assert!(result.is_err());

        state.set("foo", 3);
        assert_eq!(*calls.lock(), vec![(Some(1), 3)]);
    }

    #[test]
    fn stop_keeps_handle_but_detaches() {
        let runtime = Runtime::new();
        let state = runtime.reactive([("foo", 1)]);
        let (calls, callback) = recorder();

        let state_clone = state.clone();
        let watch = runtime.watch(
            move || state_clone.get("foo").as_i64().unwrap_or(0),
            callback,
            WatchOptions::default(),
        );

        watch.stop();
        assert!(watch.is_stopped());

        state.set("foo", 2);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn deep_watch_sees_nested_writes() {
        let runtime = Runtime::new();
        let state = runtime
            .reactive_from_str(r#"{"a": {"b": {"c": 1}}, "top": 0}"#)
            .unwrap();
        let hits = Arc::new(Mutex::new(0));

        let hits_clone = hits.clone();
        let _watch = runtime.watch_deep(
            &state,
            move |old, new| {
                assert_eq!(old.map(Reactive::id), Some(new.id()));
                *hits_clone.lock() += 1;
            },
            WatchOptions::default(),
        );

        let c_holder = state
            .get_as::<Reactive>("a")
            .and_then(|a| a.get_as::<Reactive>("b"))
            .unwrap();
        c_holder.set("c", 2);
        state.set("top", 1);

        assert_eq!(*hits.lock(), 2);
    }

    #[test]
    fn traverse_terminates_on_cycles() {
        let runtime = Runtime::new();
        let a = runtime.reactive([("name", "a")]);
        let b = runtime.reactive([("name", "b")]);
        a.set("next", &b);
        b.set("next", &a);

        let a_clone = a.clone();
        let effect = runtime.effect(move || traverse(&a_clone));

        // Two fields on each of two objects
        assert_eq!(effect.dependency_count(), 4);

        a.set("next", Value::Null);
    }

    #[test]
    fn options_deserialize_from_json() {
        let options: WatchOptions =
            serde_json::from_str(r#"{"immediate": true, "flush": "post"}"#).unwrap();
        assert_eq!(options, WatchOptions::new().immediate(true).flush(FlushMode::Post));

        let defaults: WatchOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, WatchOptions::default());
        assert_eq!(defaults.flush, FlushMode::Sync);
    }

    #[test]
    fn flush_mode_parses_and_rejects_unknown() {
        assert_eq!("sync".parse::<FlushMode>().unwrap(), FlushMode::Sync);
        assert_eq!("post".parse::<FlushMode>().unwrap(), FlushMode::Post);
        assert_eq!(FlushMode::Post.to_string(), "post");

        let err = "pre".parse::<FlushMode>().unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidFlushMode(mode) if mode == "pre"));
    }
}

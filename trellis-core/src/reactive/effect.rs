//! Effect Implementation
//!
//! An Effect wraps a computation that re-runs whenever a field it read
//! during its previous run is written.
//!
//! # How Effects Work
//!
//! 1. Unless created lazily, the effect runs once immediately to establish
//!    its initial dependencies.
//!
//! 2. Every run first detaches the effect from all dependency sets it joined
//!    last time, then pushes it onto the execution context, runs the
//!    computation, and pops it again. Only reads made during *this* run are
//!    tracked, so a field read on a branch that is no longer taken stops
//!    triggering the effect.
//!
//! 3. When a tracked field is written, the effect is dispatched: to its
//!    scheduler if it has one, otherwise straight to `run()`.
//!
//! # Schedulers
//!
//! A [`Scheduler`] receives a type-erased [`EffectRunner`] instead of having
//! the effect re-run directly. It may run it now, later, or not at all. Watch
//! is built this way.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::graph::{DepKey, EffectId, ObjectId};

use super::runtime::RuntimeInner;

/// Type-erased view of an effect, as stored in the dependency graph.
pub(crate) trait AnyEffect: Send + Sync {
    fn id(&self) -> EffectId;

    /// Run the effect and discard its result.
    fn execute(self: Arc<Self>);

    fn scheduler(&self) -> Option<Arc<dyn Scheduler>>;

    fn is_stopped(&self) -> bool;

    /// Remember that this effect now sits in the set for `key`.
    fn record_dep(&self, key: DepKey);

    /// Drop every remembered key that belongs to `object`.
    fn release_object(&self, object: ObjectId);

    fn stop(&self);
}

pub(crate) type EffectRef = Arc<dyn AnyEffect>;

/// Dispatch a triggered effect to its scheduler, or run it directly.
pub(crate) fn dispatch(runner: EffectRef) {
    match runner.scheduler() {
        Some(scheduler) => scheduler.schedule(EffectRunner::from_ref(runner)),
        None => runner.execute(),
    }
}

/// Decides when a triggered effect actually runs.
///
/// Any `Fn(EffectRunner)` closure is a scheduler.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, runner: EffectRunner);
}

impl<F> Scheduler for F
where
    F: Fn(EffectRunner) + Send + Sync,
{
    fn schedule(&self, runner: EffectRunner) {
        self(runner)
    }
}

/// Handle to an effect with its result type erased.
///
/// This is what schedulers receive. Running it re-runs the effect with full
/// dependency tracking and drops the computed value.
#[derive(Clone)]
pub struct EffectRunner {
    inner: EffectRef,
}

impl EffectRunner {
    pub(crate) fn from_ref(inner: EffectRef) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> EffectId {
        self.inner.id()
    }

    pub fn run(&self) {
        Arc::clone(&self.inner).execute();
    }

    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl fmt::Debug for EffectRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRunner")
            .field("id", &self.id())
            .finish()
    }
}

/// Options controlling how an effect is created and re-run.
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Skip the initial run. The caller runs the effect explicitly.
    pub lazy: bool,

    /// Invoked instead of `run()` when a dependency changes.
    pub scheduler: Option<Arc<dyn Scheduler>>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn scheduler<S>(mut self, scheduler: S) -> Self
    where
        S: Scheduler + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

pub(crate) struct EffectInner<T> {
    id: EffectId,

    /// The user computation.
    compute: Box<dyn Fn() -> T + Send + Sync>,

    lazy: bool,

    scheduler: Option<Arc<dyn Scheduler>>,

    /// Keys whose dependency sets currently contain this effect.
    deps: Mutex<SmallVec<[DepKey; 4]>>,

    stopped: AtomicBool,

    run_count: AtomicUsize,

    runtime: Weak<RuntimeInner>,
}

impl<T: 'static> EffectInner<T> {
    fn run(self: &Arc<Self>) -> T {
        let Some(runtime) = self.runtime.upgrade() else {
            return (self.compute)();
        };

        let value = if self.stopped.load(Ordering::SeqCst) {
            // Still shadows any outer effect, but `track` ignores stopped
            // runners, so the reads land nowhere.
            let runner: EffectRef = self.clone();
            let _guard = runtime.context.enter(self.id, runner);
            (self.compute)()
        } else {
            // Must happen before the computation so this run's reads fully
            // replace the previous run's.
            self.cleanup(&runtime);

            let runner: EffectRef = self.clone();
            let _guard = runtime.context.enter(self.id, runner);

            self.run_count.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(effect = %self.id, "run");

            (self.compute)()
        };

        // Jobs deferred by writes inside a top-level run are drained here.
        runtime.flush_if_idle();
        value
    }

    fn cleanup(&self, runtime: &RuntimeInner) {
        let deps = std::mem::take(&mut *self.deps.lock());
        if !deps.is_empty() {
            tracing::trace!(effect = %self.id, deps = deps.len(), "cleanup");
            runtime.untrack_all(self.id, deps);
        }
    }
}

impl<T: 'static> AnyEffect for EffectInner<T> {
    fn id(&self) -> EffectId {
        self.id
    }

    fn execute(self: Arc<Self>) {
        let _ = self.run();
    }

    fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
        self.scheduler.clone()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn record_dep(&self, key: DepKey) {
        self.deps.lock().push(key);
    }

    fn release_object(&self, object: ObjectId) {
        self.deps.lock().retain(|key| key.object != object);
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            self.cleanup(&runtime);
        }
        tracing::trace!(effect = %self.id, "stopped");
    }
}

/// A re-runnable computation whose field reads are tracked.
///
/// Cloning the handle shares the underlying effect.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let state = runtime.reactive([("count", 0)]);
///
/// let effect = runtime.effect({
///     let state = state.clone();
///     move || println!("Count is: {:?}", state.get("count"))
/// });
///
/// state.set("count", 5);  // Prints: "Count is: Int(5)"
/// ```
pub struct Effect<T> {
    inner: Arc<EffectInner<T>>,
}

impl<T: 'static> Effect<T> {
    /// Create an effect bound to `runtime`.
    ///
    /// Runs the computation once immediately unless `options.lazy` is set.
    pub(crate) fn new<F>(runtime: &Arc<RuntimeInner>, compute: F, options: EffectOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let effect = Self {
            inner: Arc::new(EffectInner {
                id: EffectId::new(),
                compute: Box::new(compute),
                lazy: options.lazy,
                scheduler: options.scheduler,
                deps: Mutex::new(SmallVec::new()),
                stopped: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
                runtime: Arc::downgrade(runtime),
            }),
        };

        if !effect.inner.lazy {
            effect.run();
        }

        effect
    }

    /// Run the computation now, re-collecting dependencies, and return its
    /// value.
    pub fn run(&self) -> T {
        self.inner.run()
    }

    /// Dispatch the effect as if one of its dependencies had changed.
    ///
    /// Goes through the scheduler when one is configured.
    pub fn schedule(&self) {
        dispatch(self.inner.clone());
    }

    /// Detach the effect from every dependency. Later writes no longer reach
    /// it, and `run()` evaluates the computation without tracking. Reads made
    /// by such a run are not attributed to an enclosing effect either.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    /// Number of tracked runs so far.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of `(object, field)` sets the effect currently belongs to.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.lock().len()
    }

    /// Type-erased handle to this effect.
    pub fn runner(&self) -> EffectRunner {
        EffectRunner {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

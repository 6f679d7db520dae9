//! Execution Context
//!
//! The execution context tracks which effect runner is currently executing.
//! When a tracked field is read, the runner on top of this stack is the one
//! that gets registered as a dependent.
//!
//! # Implementation
//!
//! Each [`Runtime`](super::Runtime) owns one context. Running an effect
//! pushes it. The returned [`ContextGuard`] pops it again when dropped, which
//! also covers unwinding out of a panicking computation.
//!
//! The stack supports nested runs. An effect created inside another effect
//! pushes above it. Once the inner run finishes, the outer runner is active
//! again.

use parking_lot::Mutex;

use crate::graph::EffectId;

/// Stack of runners currently executing, innermost last.
pub struct ExecutionContext<R> {
    stack: Mutex<Vec<(EffectId, R)>>,
}

impl<R: Clone> ExecutionContext<R> {
    pub fn new() -> Self {
        Self {
            stack: Mutex::new(Vec::new()),
        }
    }

    /// Push `runner` and make it the active one until the guard is dropped.
    pub fn enter(&self, id: EffectId, runner: R) -> ContextGuard<'_, R> {
        self.push(id, runner);
        ContextGuard { context: self, id }
    }

    pub fn push(&self, id: EffectId, runner: R) {
        self.stack.lock().push((id, runner));
    }

    /// Pop the active runner, returning its ID.
    pub fn pop(&self) -> Option<EffectId> {
        // The runner may be the last handle to its effect, so it is dropped
        // after the lock is released.
        let popped = self.stack.lock().pop();
        popped.map(|(id, _)| id)
    }

    /// The runner on top of the stack, if any.
    pub fn current(&self) -> Option<(EffectId, R)> {
        self.stack.lock().last().cloned()
    }

    pub fn current_id(&self) -> Option<EffectId> {
        self.stack.lock().last().map(|(id, _)| *id)
    }

    pub fn is_active(&self) -> bool {
        !self.stack.lock().is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }
}

impl<R: Clone> Default for ExecutionContext<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ContextGuard<'a, R: Clone> {
    context: &'a ExecutionContext<R>,
    id: EffectId,
}

impl<R: Clone> Drop for ContextGuard<'_, R> {
    fn drop(&mut self) {
        let popped = self.context.pop();

        // Catches guards dropped out of order.
        if let Some(popped) = popped {
            debug_assert_eq!(
                popped, self.id,
                "ExecutionContext mismatch: expected {:?}, got {:?}",
                self.id, popped
            );
        }
    }
}

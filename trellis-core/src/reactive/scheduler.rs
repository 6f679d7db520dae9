//! Post-flush job queue.
//!
//! Jobs deferred with the `post` flush mode wait here until the current
//! synchronous turn is over. This plays the role of a microtask queue:
//!
//! 1. All synchronous writes of the turn complete, and their direct effects
//!    run, while jobs accumulate.
//! 2. When the outermost turn ends (or [`Runtime::flush_jobs`] is called),
//!    jobs run in FIFO order. A write made outside any turn and outside any
//!    running effect counts as a turn of its own.
//! 3. A job queued while draining runs in the same drain, after the jobs
//!    already waiting.
//!
//! [`Runtime::flush_jobs`]: super::Runtime::flush_jobs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct JobQueue {
    pending: Mutex<VecDeque<Job>>,
    turn_depth: AtomicUsize,
    flushing: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            turn_depth: AtomicUsize::new(0),
            flushing: AtomicBool::new(false),
        }
    }

    pub fn push(&self, job: Job) {
        self.pending.lock().push_back(job);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn enter_turn(&self) -> TurnGuard<'_> {
        self.turn_depth.fetch_add(1, Ordering::SeqCst);
        TurnGuard {
            depth: &self.turn_depth,
        }
    }

    pub fn in_turn(&self) -> bool {
        self.turn_depth.load(Ordering::SeqCst) > 0
    }

    /// Run queued jobs until the queue is empty.
    ///
    /// Returns the number of jobs run. A call made while a drain is already
    /// in progress returns 0 immediately; the outer drain picks up the work.
    pub fn flush(&self) -> usize {
        if self.flushing.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _flushing = FlushGuard {
            flag: &self.flushing,
        };

        let mut ran = 0;
        loop {
            // The lock is released before the job runs.
            let next = self.pending.lock().pop_front();
            match next {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct TurnGuard<'a> {
    depth: &'a AtomicUsize,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

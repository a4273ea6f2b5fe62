//! Scheduler Jobs
//!
//! A job is a callback with identity. The queue deduplicates by identity, so
//! queueing the same job twice before it runs has no extra effect.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Generate a new unique job ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

struct JobInner {
    id: JobId,
    run: Box<dyn Fn()>,
    allow_recurse: Cell<bool>,
}

/// A schedulable callback.
///
/// Cloning a job clones the handle; both clones are the same job.
#[derive(Clone)]
pub struct Job {
    inner: Rc<JobInner>,
}

impl Job {
    pub fn new(run: impl Fn() + 'static) -> Self {
        Self {
            inner: Rc::new(JobInner {
                id: JobId::new(),
                run: Box::new(run),
                allow_recurse: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Whether the job may re-queue itself while it is running.
    pub fn allow_recurse(&self) -> bool {
        self.inner.allow_recurse.get()
    }

    pub fn set_allow_recurse(&self, allow: bool) {
        self.inner.allow_recurse.set(allow);
    }

    /// Run the job now, outside the queue.
    pub fn invoke(&self) {
        (self.inner.run)();
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Job {}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("allow_recurse", &self.inner.allow_recurse.get())
            .finish()
    }
}

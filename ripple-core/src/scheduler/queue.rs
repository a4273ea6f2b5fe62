//! Job Queue
//!
//! Triggered work is batched into a single flush per tick.
//!
//! # Algorithm
//!
//! A flush drains three queues in phase order:
//!
//! 1. Pre-flush callbacks (pre watchers). These are drained before the main
//!    queue starts and again before every main-queue job, so state settles
//!    before anything renders.
//! 2. The main queue (owner update jobs), FIFO from index 0. The loop
//!    re-reads the queue length every iteration, so jobs queued during the
//!    flush run in the same flush.
//! 3. Post-flush callbacks (post watchers), after the main queue is empty.
//!
//! If any phase queued more work, the whole cycle repeats. When everything
//! is empty, the `on_next_tick` callbacks run.
//!
//! Every job runs guarded: a panic is reported and the flush continues. A
//! job that runs more than the configured recursion limit in one flush is
//! skipped and reported as an infinite update loop.
//!
//! # When a Flush Happens
//!
//! Queueing work on a thread inside a current-thread tokio runtime spawns
//! the flush as a task, which runs at the host's next yield point. Anywhere
//! else the flush stays pending until the host calls [`flush`] or awaits
//! [`next_tick`].

use std::cell::RefCell;
use std::collections::HashMap;

use tokio::runtime::{Handle, RuntimeFlavor};

use super::job::{Job, JobId};
use crate::config;
use crate::error::{call_with_error_handling, handle_error, ErrorSource, ReactiveError};

#[derive(Default)]
struct QueueState {
    queue: Vec<Job>,
    flush_index: usize,
    pending_pre: Vec<Job>,
    active_pre: Vec<Job>,
    pre_index: usize,
    pending_post: Vec<Job>,
    active_post: Vec<Job>,
    post_index: usize,
    tick_callbacks: Vec<Box<dyn FnOnce()>>,
    is_flushing: bool,
    is_flush_pending: bool,
}

impl QueueState {
    fn has_work(&self) -> bool {
        !self.queue.is_empty() || !self.pending_pre.is_empty() || !self.pending_post.is_empty()
    }
}

thread_local! {
    static QUEUE: RefCell<QueueState> = RefCell::new(QueueState::default());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pre,
    Post,
}

impl Phase {
    fn origin(self) -> ErrorSource {
        match self {
            Phase::Pre => ErrorSource::PreFlushJob,
            Phase::Post => ErrorSource::PostFlushJob,
        }
    }
}

/// Queue a main-phase job.
///
/// Does nothing if the job is already waiting. While the job itself is
/// running it counts as waiting, unless it allows recursion.
pub fn queue_job(job: &Job) {
    let queued = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        let start = if q.is_flushing && job.allow_recurse() {
            q.flush_index + 1
        } else {
            q.flush_index
        };
        let present = q
            .queue
            .get(start..)
            .is_some_and(|waiting| waiting.contains(job));
        if !present {
            q.queue.push(job.clone());
        }
        !present
    });
    if queued {
        queue_flush();
    }
}

/// Queue a job to run before the main-phase jobs.
pub fn queue_pre_flush_cb(job: &Job) {
    queue_cb(job, Phase::Pre);
}

/// Queue a job to run after the main-phase jobs.
pub fn queue_post_flush_cb(job: &Job) {
    queue_cb(job, Phase::Post);
}

fn queue_cb(job: &Job, phase: Phase) {
    QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        let QueueState {
            pending_pre,
            active_pre,
            pre_index,
            pending_post,
            active_post,
            post_index,
            ..
        } = &mut *q;
        let (pending, active, index) = match phase {
            Phase::Pre => (pending_pre, active_pre, *pre_index),
            Phase::Post => (pending_post, active_post, *post_index),
        };

        let start = if job.allow_recurse() { index + 1 } else { index };
        let running = active.get(start..).is_some_and(|rest| rest.contains(job));
        if !running && !pending.contains(job) {
            pending.push(job.clone());
        }
    });
    queue_flush();
}

fn queue_flush() {
    let schedule = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        if q.is_flushing || q.is_flush_pending {
            return false;
        }
        q.is_flush_pending = true;
        true
    });
    if !schedule {
        return;
    }

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            tracing::trace!("flush scheduled on the current-thread runtime");
            handle.spawn(async { flush() });
        }
        _ => tracing::trace!("flush pending until the host drives it"),
    }
}

/// Returns true when work is queued but no flush has started yet.
pub fn has_pending_flush() -> bool {
    QUEUE.with(|q| q.borrow().is_flush_pending)
}

/// Returns true while a flush is running on this thread.
pub fn is_flushing() -> bool {
    QUEUE.with(|q| q.borrow().is_flushing)
}

/// Number of jobs waiting in all three queues.
pub fn pending_job_count() -> usize {
    QUEUE.with(|q| {
        let q = q.borrow();
        q.queue.len().saturating_sub(q.flush_index) + q.pending_pre.len() + q.pending_post.len()
    })
}

/// Register a callback to run once the current (or next) flush completes.
pub fn on_next_tick(callback: impl FnOnce() + 'static) {
    QUEUE.with(|q| q.borrow_mut().tick_callbacks.push(Box::new(callback)));
    queue_flush();
}

/// Resolve after the current (or next) flush completes.
///
/// Yields once so an already spawned flush task can run first, then drives
/// any remaining work itself.
pub async fn next_tick() {
    tokio::task::yield_now().await;
    flush();
}

/// Run every queued job now.
///
/// Calling this from inside a running flush does nothing.
pub fn flush() {
    let started = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        q.is_flush_pending = false;
        if q.is_flushing {
            return false;
        }
        q.is_flushing = true;
        true
    });
    if !started {
        return;
    }

    tracing::debug!(pending = pending_job_count(), "flush start");
    let mut seen: HashMap<JobId, usize> = HashMap::new();

    loop {
        flush_phase(Phase::Pre, &mut seen);

        loop {
            let job = QUEUE.with(|q| {
                let q = q.borrow();
                q.queue.get(q.flush_index).cloned()
            });
            let Some(job) = job else { break };

            flush_phase(Phase::Pre, &mut seen);
            run_job(&job, &mut seen, ErrorSource::FlushJob);
            QUEUE.with(|q| q.borrow_mut().flush_index += 1);
        }
        QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            q.queue.clear();
            q.flush_index = 0;
        });

        flush_phase(Phase::Post, &mut seen);

        if !QUEUE.with(|q| q.borrow().has_work()) {
            break;
        }
    }

    let callbacks = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        q.is_flushing = false;
        std::mem::take(&mut q.tick_callbacks)
    });
    tracing::debug!(ticks = callbacks.len(), jobs = seen.len(), "flush complete");

    for callback in callbacks {
        call_with_error_handling(ErrorSource::NextTick, callback);
    }
}

fn flush_phase(phase: Phase, seen: &mut HashMap<JobId, usize>) {
    loop {
        let activated = QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            let q = &mut *q;
            let (pending, active, index) = match phase {
                Phase::Pre => (&mut q.pending_pre, &mut q.active_pre, &mut q.pre_index),
                Phase::Post => (&mut q.pending_post, &mut q.active_post, &mut q.post_index),
            };
            if pending.is_empty() {
                return false;
            }
            *active = std::mem::take(pending);
            *index = 0;
            true
        });
        if !activated {
            return;
        }

        loop {
            let job = QUEUE.with(|q| {
                let q = q.borrow();
                match phase {
                    Phase::Pre => q.active_pre.get(q.pre_index).cloned(),
                    Phase::Post => q.active_post.get(q.post_index).cloned(),
                }
            });
            let Some(job) = job else { break };

            run_job(&job, seen, phase.origin());
            QUEUE.with(|q| {
                let mut q = q.borrow_mut();
                match phase {
                    Phase::Pre => q.pre_index += 1,
                    Phase::Post => q.post_index += 1,
                }
            });
        }

        QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            match phase {
                Phase::Pre => {
                    q.active_pre.clear();
                    q.pre_index = 0;
                }
                Phase::Post => {
                    q.active_post.clear();
                    q.post_index = 0;
                }
            }
        });
    }
}

fn run_job(job: &Job, seen: &mut HashMap<JobId, usize>, origin: ErrorSource) {
    let limit = config::recursion_limit();
    let count = seen.entry(job.id()).or_insert(0);
    *count += 1;
    if *count > limit {
        if *count == limit + 1 {
            handle_error(
                ReactiveError::RecursionLimit {
                    job: job.id().raw(),
                    limit,
                },
                None,
            );
        }
        return;
    }
    call_with_error_handling(origin, || job.invoke());
}

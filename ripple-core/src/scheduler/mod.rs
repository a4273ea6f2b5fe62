//! Scheduler
//!
//! Reactions that should not run inline are turned into [`Job`]s and queued.
//! Owner updates go in the main queue, `pre` watchers run before it and
//! `post` watchers after it. See [`queue`] for the flush algorithm.
//!
//! # Deduplication
//!
//! A job is queued at most once per flush: triggering the same owner ten
//! times in one synchronous block produces one update. A job that is
//! currently running does not count as queued when it allows recursion, so
//! a watcher that writes its own source gets re-run once more.

pub mod job;
pub mod queue;

pub use job::{Job, JobId};
pub use queue::{
    flush, has_pending_flush, is_flushing, next_tick, on_next_tick, pending_job_count,
    queue_job, queue_post_flush_cb, queue_pre_flush_cb,
};

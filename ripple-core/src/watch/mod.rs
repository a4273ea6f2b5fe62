//! Watchers
//!
//! A watcher couples a source to a callback invoked with the new and old
//! value. It is built from three pieces the rest of the crate already has:
//!
//! - a lazy [`ReactiveEffect`](crate::reactive::ReactiveEffect) whose
//!   function reads the source (and traverses it when deep)
//! - a [`Job`](crate::scheduler::Job) that re-runs the effect, compares the
//!   result with the previous value and calls back
//! - a scheduler that decides when the job runs: inside the triggering
//!   write (`sync`), before owner updates (`pre`) or after them (`post`)
//!
//! ```text
//!   write ──► trigger ──► scheduler ──► job (queued) ──► flush
//!                                                          │
//!                      callback(new, old) ◄── changed? ◄───┘
//! ```
//!
//! Errors in getters, callbacks and cleanups are contained and reported
//! against the owner that created the watcher.

mod source;
mod watcher;

pub use source::WatchSource;
pub use watcher::{
    watch, watch_effect, watch_many, watch_post_effect, watch_sync_effect, FlushTiming, OnCleanup,
    WatchHandle, WatchOptions,
};

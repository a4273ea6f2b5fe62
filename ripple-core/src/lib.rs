//! Ripple Core
//!
//! This crate provides the core runtime for fine-grained reactivity.
//! It implements:
//!
//! - Reactive primitives (containers, refs, computeds, effects)
//! - Automatic dependency tracking
//! - A batched job scheduler with pre / main / post phases
//! - Watchers with change detection and cleanup
//! - Owners: lifecycle hooks, provide/inject and joint teardown
//!
//! The runtime is single-threaded by construction: all of its state is
//! thread-local and every handle is `!Send`. A flush is spawned on the
//! current-thread tokio runtime when one is running, or driven by the host
//! through [`scheduler::flush`] otherwise.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Containers, refs, computeds, effects and the dependency tracker
//! - `scheduler`: Job queue and flush loop
//! - `watch`: Watchers built from effects and jobs
//! - `owner`: Component-like owners and their lifecycle
//! - `error`: Error types and callback error routing
//! - `config`: Runtime settings
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::reactive::{computed, make_ref};
//! use ripple_core::watch::{watch, WatchOptions};
//! use ripple_core::scheduler::next_tick;
//!
//! // Create a ref
//! let count = make_ref(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = computed(move || c.get() * 2);
//!
//! // Watch it
//! let _handle = watch(&doubled, |new, old, _| {
//!     println!("doubled: {old:?} -> {new}");
//! }, WatchOptions::default());
//!
//! // Update the ref
//! count.set(5);
//! next_tick().await;
//! // Watcher ran once, prints: "doubled: Some(0) -> 10"
//! ```

pub mod config;
pub mod error;
pub mod owner;
pub mod reactive;
pub mod scheduler;
pub mod watch;

pub use config::RuntimeConfig;
pub use error::{
    call_with_error_handling, clear_global_error_handler, handle_error,
    set_global_error_handler, CallbackReturn, ErrorSource, ReactiveError,
};
pub use owner::{Component, Owner, SetupResult};
pub use reactive::{
    computed, effect, make_ref, reactive, readonly, Computed, EffectOptions, EffectRunner,
    EffectScope,
    Object, Reactive, ReactiveEffect, Ref, Value,
};
pub use scheduler::{next_tick, on_next_tick};
pub use watch::{watch, watch_effect, WatchOptions};

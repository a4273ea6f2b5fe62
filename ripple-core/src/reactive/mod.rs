//! Reactive Primitives
//!
//! This module implements the core reactive system: containers, refs,
//! computeds and effects. These primitives form the foundation of Ripple's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Containers
//!
//! A [`Reactive`] is a tracked view of an object or array. When one of its
//! keys is read inside a running effect, the effect subscribes to that key.
//! When the key is written with a different value, every subscriber is
//! notified.
//!
//! ## Refs
//!
//! A [`Ref`] is a single tracked slot, for values that are not objects.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changes, and only when read.
//!
//! ## Effects
//!
//! A [`ReactiveEffect`] is a computation that re-runs whenever its
//! dependencies change, either inline or through a scheduler. Watchers and
//! owner render functions are both effects with schedulers.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a reactive value is read, we check if there is
//! an active tracking context and, if so, register the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod computed;
mod container;
mod context;
mod effect;
mod refs;
mod runtime;
mod scope;
mod subscriber;
mod value;

pub use computed::{computed, computed_writable, Computed, ComputedState};
pub use container::{
    is_proxy, is_reactive, is_readonly, is_shallow, mark_raw, reactive, readonly,
    shallow_reactive, shallow_readonly, to_raw, Reactive,
};
pub use context::{enable_tracking, pause_tracking, reset_tracking, untracked, ReactiveContext};
pub(crate) use context::TrackingPause;
pub use effect::{
    effect, stop, DebugHook, EffectOptions, EffectRunner, EffectScheduler, ReactiveEffect,
    WeakEffect,
};
pub use refs::{is_ref, make_ref, shallow_ref, trigger_ref, unref, MaybeRef, Ref};
pub use runtime::Runtime;
pub use scope::{current_scope, on_scope_dispose, EffectScope};
pub use subscriber::{
    DebuggerEvent, DebuggerEventKind, DepKey, SubscriberId, TargetId, TrackOp, TriggerOp,
};
pub use value::{Key, Object, ReactiveValue, Seen, Value};

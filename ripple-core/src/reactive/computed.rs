//! Computed Values
//!
//! A computed is a cached derived value that re-evaluates only after one of
//! its dependencies changes.
//!
//! # How Computeds Work
//!
//! 1. The getter is wrapped in a lazy effect. Nothing runs on creation.
//!
//! 2. On first read, the effect runs, records the getter's dependencies and
//!    caches the result.
//!
//! 3. When a dependency changes, the effect's scheduler marks the computed
//!    dirty and notifies whoever read the computed. No recomputation happens
//!    yet.
//!
//! 4. The next read sees the dirty flag and recomputes.
//!
//! # Why This Matters
//!
//! - A ref changes
//! - 10 computeds depend on it
//! - Only the computeds actually read will recompute
//! - Computeds that are never read stay dirty (no wasted work)
//!
//! Computed effects are notified before plain effects, so by the time an
//! effect that reads a computed re-runs, the computed is already dirty.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::effect::{EffectOptions, ReactiveEffect};
use super::runtime::Runtime;
use super::subscriber::{DepKey, TargetId, TrackOp, TriggerOp};
use super::value::{ReactiveValue, Seen};
use crate::config::dev_warn;

/// Dirty state for a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed (or the value was never computed).
    Dirty,
}

struct ComputedInner<T> {
    id: TargetId,
    getter: Rc<dyn Fn() -> T>,
    setter: Option<Rc<dyn Fn(T)>>,
    value: RefCell<Option<T>>,
    state: Cell<ComputedState>,
    effect: ReactiveEffect,
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        Runtime::forget_target(self.id);
    }
}

/// A cached derived value.
///
/// # Example
///
/// ```rust,ignore
/// let base = make_ref(2);
/// let b = base.clone();
/// let doubled = computed(move || b.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// base.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: Clone + 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a read-only computed.
    ///
    /// The getter is not run until the first read.
    pub fn new(getter: impl Fn() -> T + 'static) -> Self {
        Self::build(Rc::new(getter), None)
    }

    /// Create a computed whose `set` calls `setter`.
    pub fn writable(getter: impl Fn() -> T + 'static, setter: impl Fn(T) + 'static) -> Self {
        Self::build(Rc::new(getter), Some(Rc::new(setter)))
    }

    fn build(getter: Rc<dyn Fn() -> T>, setter: Option<Rc<dyn Fn(T)>>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let run = weak.clone();
            let invalidate = weak.clone();

            let effect = ReactiveEffect::new(
                move || {
                    if let Some(inner) = run.upgrade() {
                        let value = (inner.getter)();
                        *inner.value.borrow_mut() = Some(value);
                    }
                },
                EffectOptions::default()
                    .lazy()
                    .computed()
                    .scheduler(move |_| {
                        if let Some(inner) = invalidate.upgrade() {
                            inner.invalidate();
                        }
                    }),
            );

            ComputedInner {
                id: TargetId::new(),
                getter,
                setter,
                value: RefCell::new(None),
                state: Cell::new(ComputedState::Dirty),
                effect,
            }
        });
        Self { inner }
    }

    /// Get the current value, recomputing if dirty, and track it.
    pub fn get(&self) -> T {
        let inner = &self.inner;
        if !inner.effect.is_active() {
            // Stopped: nothing will mark it dirty, so always recompute.
            let value = (inner.getter)();
            *inner.value.borrow_mut() = Some(value);
        } else if inner.state.get() == ComputedState::Dirty {
            inner.effect.run();
            inner.state.set(ComputedState::Clean);
        }
        Runtime::track(inner.id, TrackOp::Get, DepKey::Value);
        inner
            .value
            .borrow()
            .clone()
            .expect("computed read itself while evaluating")
    }

    /// Write through the setter. Returns false (with a dev-mode warning) for
    /// read-only computeds.
    pub fn set(&self, value: T) -> bool {
        match &self.inner.setter {
            Some(setter) => {
                let setter = Rc::clone(setter);
                setter(value);
                true
            }
            None => {
                dev_warn!(
                    target_id = self.inner.id.raw(),
                    "write operation failed: computed value is readonly"
                );
                false
            }
        }
    }

    pub fn state(&self) -> ComputedState {
        self.inner.state.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.state() == ComputedState::Dirty
    }

    pub fn is_writable(&self) -> bool {
        self.inner.setter.is_some()
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// The effect that evaluates the getter.
    pub fn effect(&self) -> &ReactiveEffect {
        &self.inner.effect
    }

    /// Stop tracking dependencies. Later reads recompute every time.
    pub fn stop(&self) {
        self.inner.effect.stop();
        self.inner.state.set(ComputedState::Dirty);
    }

    pub fn ptr_eq(&self, other: &Computed<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> ComputedInner<T> {
    fn invalidate(&self) {
        if self.state.get() == ComputedState::Clean {
            self.state.set(ComputedState::Dirty);
            Runtime::trigger(self.id, TriggerOp::Set, &[DepKey::Value]);
        }
    }
}

impl<T: Clone + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl<T: ReactiveValue> ReactiveValue for Computed<T> {
    fn has_changed(&self, old: &Self) -> bool {
        !self.ptr_eq(old)
    }

    fn traverse(&self, seen: &mut Seen) {
        if seen.insert(self.inner.id) {
            self.get().traverse(seen);
        }
    }
}

/// Create a read-only computed. See [`Computed::new`].
pub fn computed<T: Clone + 'static>(getter: impl Fn() -> T + 'static) -> Computed<T> {
    Computed::new(getter)
}

/// Create a writable computed. See [`Computed::writable`].
pub fn computed_writable<T: Clone + 'static>(
    getter: impl Fn() -> T + 'static,
    setter: impl Fn(T) + 'static,
) -> Computed<T> {
    Computed::writable(getter, setter)
}

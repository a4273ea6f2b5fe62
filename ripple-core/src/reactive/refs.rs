//! Refs
//!
//! A [`Ref`] is a single-slot container. Reading it tracks `DepKey::Value`;
//! writing it compares the raw old and new values and notifies only on a
//! real change.
//!
//! A deep ref keeps two copies of its value: the raw form used for change
//! detection and the reactive form handed to readers (objects come back as
//! reactive views). A shallow ref stores exactly what it is given, and is
//! notified only by replacing the whole value or by [`trigger_ref`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use super::subscriber::{DepKey, TargetId, TrackOp, TriggerOp};
use super::value::{ReactiveValue, Seen, Value};

struct RefInner<T> {
    id: TargetId,
    raw: RefCell<T>,
    value: RefCell<T>,
    shallow: bool,
}

impl<T> Drop for RefInner<T> {
    fn drop(&mut self) {
        Runtime::forget_target(self.id);
    }
}

/// A tracked single value.
///
/// # Example
///
/// ```rust,ignore
/// let count = make_ref(0);
/// let doubled = computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// count.set(21);
/// assert_eq!(doubled.get(), 42);
/// ```
pub struct Ref<T: ReactiveValue> {
    inner: Rc<RefInner<T>>,
}

impl<T: ReactiveValue> Ref<T> {
    /// Create a deep ref.
    pub fn new(value: T) -> Self {
        Self::build(value.to_raw(), value.to_reactive(), false)
    }

    /// Create a ref that does not convert its value.
    pub fn shallow(value: T) -> Self {
        Self::build(value.clone(), value, true)
    }

    fn build(raw: T, value: T, shallow: bool) -> Self {
        Self {
            inner: Rc::new(RefInner {
                id: TargetId::new(),
                raw: RefCell::new(raw),
                value: RefCell::new(value),
                shallow,
            }),
        }
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.shallow
    }

    /// Read the value, tracking it.
    pub fn get(&self) -> T {
        Runtime::track(self.inner.id, TrackOp::Get, DepKey::Value);
        self.inner.value.borrow().clone()
    }

    /// Read the value without tracking.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the value, tracking it.
    ///
    /// The borrow is held for the duration of `f`; writing this ref from
    /// inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::track(self.inner.id, TrackOp::Get, DepKey::Value);
        f(&self.inner.value.borrow())
    }

    /// Replace the value. Returns true if it changed.
    pub fn set(&self, value: T) -> bool {
        let inner = &self.inner;
        let raw = if inner.shallow { value.clone() } else { value.to_raw() };

        let changed = raw.has_changed(&inner.raw.borrow());
        if !changed {
            return false;
        }

        let value = if inner.shallow { value } else { value.to_reactive() };
        *inner.raw.borrow_mut() = raw;
        *inner.value.borrow_mut() = value;
        Runtime::trigger(inner.id, TriggerOp::Set, &[DepKey::Value]);
        true
    }

    /// Replace the value with `f` applied to the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&self.get_untracked());
        self.set(next)
    }

    /// Notify dependents without changing the value.
    pub fn trigger(&self) {
        Runtime::trigger(self.inner.id, TriggerOp::Set, &[DepKey::Value]);
    }

    pub fn ptr_eq(&self, other: &Ref<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: ReactiveValue> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: ReactiveValue + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("shallow", &self.inner.shallow)
            .finish()
    }
}

impl<T: ReactiveValue> ReactiveValue for Ref<T> {
    fn has_changed(&self, old: &Self) -> bool {
        !self.ptr_eq(old)
    }

    fn traverse(&self, seen: &mut Seen) {
        if seen.insert(self.inner.id) {
            self.get().traverse(seen);
        }
    }
}

/// Create a deep ref.
pub fn make_ref<T: ReactiveValue>(value: T) -> Ref<T> {
    Ref::new(value)
}

/// Create a shallow ref.
pub fn shallow_ref<T: ReactiveValue>(value: T) -> Ref<T> {
    Ref::shallow(value)
}

/// Notify a ref's dependents. Mostly useful with shallow refs after
/// mutating the object they hold.
pub fn trigger_ref<T: ReactiveValue>(r: &Ref<T>) {
    r.trigger();
}

/// Returns true if `value` is a ref.
pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// The value of a ref (tracked), or `value` itself.
pub fn unref(value: &Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other.clone(),
    }
}

/// A statically typed "ref or plain value" argument.
#[derive(Debug, Clone)]
pub enum MaybeRef<T: ReactiveValue> {
    Ref(Ref<T>),
    Plain(T),
}

impl<T: ReactiveValue> MaybeRef<T> {
    pub fn is_ref(&self) -> bool {
        matches!(self, MaybeRef::Ref(_))
    }

    /// The current value, tracking it if this is a ref.
    pub fn unref(&self) -> T {
        match self {
            MaybeRef::Ref(r) => r.get(),
            MaybeRef::Plain(v) => v.clone(),
        }
    }
}

impl<T: ReactiveValue> From<Ref<T>> for MaybeRef<T> {
    fn from(r: Ref<T>) -> Self {
        MaybeRef::Ref(r)
    }
}

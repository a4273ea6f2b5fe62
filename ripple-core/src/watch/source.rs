//! Watch Sources
//!
//! What a watcher reads on every run. A source is either a ref, a computed,
//! a getter closure, or a reactive object (which always watches deeply).

use std::fmt;
use std::rc::Rc;

use crate::reactive::{Computed, Reactive, ReactiveValue, Ref};

/// Something a watcher can read.
pub enum WatchSource<T: ReactiveValue> {
    /// Read `.get()` on a ref.
    Ref(Ref<T>),

    /// Read `.get()` on a computed.
    Computed(Computed<T>),

    /// Call a closure; whatever it reads is tracked.
    Getter(Rc<dyn Fn() -> T>),

    /// Call a closure and traverse its result, tracking every nested value.
    Deep(Rc<dyn Fn() -> T>),
}

impl<T: ReactiveValue> WatchSource<T> {
    pub fn getter(f: impl Fn() -> T + 'static) -> Self {
        WatchSource::Getter(Rc::new(f))
    }

    pub fn deep(f: impl Fn() -> T + 'static) -> Self {
        WatchSource::Deep(Rc::new(f))
    }

    /// Read the current value, tracking it in the running effect.
    ///
    /// Deep sources are not traversed here; the watcher does that.
    pub fn read(&self) -> T {
        match self {
            WatchSource::Ref(r) => r.get(),
            WatchSource::Computed(c) => c.get(),
            WatchSource::Getter(f) | WatchSource::Deep(f) => f(),
        }
    }

    /// Shallow refs fire on `trigger_ref` even when the value is unchanged.
    pub fn is_shallow_ref(&self) -> bool {
        matches!(self, WatchSource::Ref(r) if r.is_shallow())
    }

    pub fn is_deep(&self) -> bool {
        matches!(self, WatchSource::Deep(_))
    }
}

impl<T: ReactiveValue> Clone for WatchSource<T> {
    fn clone(&self) -> Self {
        match self {
            WatchSource::Ref(r) => WatchSource::Ref(r.clone()),
            WatchSource::Computed(c) => WatchSource::Computed(c.clone()),
            WatchSource::Getter(f) => WatchSource::Getter(Rc::clone(f)),
            WatchSource::Deep(f) => WatchSource::Deep(Rc::clone(f)),
        }
    }
}

impl<T: ReactiveValue> fmt::Debug for WatchSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            WatchSource::Ref(_) => "Ref",
            WatchSource::Computed(_) => "Computed",
            WatchSource::Getter(_) => "Getter",
            WatchSource::Deep(_) => "Deep",
        };
        f.debug_tuple("WatchSource").field(&kind).finish()
    }
}

impl<T: ReactiveValue> From<Ref<T>> for WatchSource<T> {
    fn from(r: Ref<T>) -> Self {
        WatchSource::Ref(r)
    }
}

impl<T: ReactiveValue> From<&Ref<T>> for WatchSource<T> {
    fn from(r: &Ref<T>) -> Self {
        WatchSource::Ref(r.clone())
    }
}

impl<T: ReactiveValue> From<Computed<T>> for WatchSource<T> {
    fn from(c: Computed<T>) -> Self {
        WatchSource::Computed(c)
    }
}

impl<T: ReactiveValue> From<&Computed<T>> for WatchSource<T> {
    fn from(c: &Computed<T>) -> Self {
        WatchSource::Computed(c.clone())
    }
}

impl From<Reactive> for WatchSource<Reactive> {
    fn from(r: Reactive) -> Self {
        WatchSource::Deep(Rc::new(move || r.clone()))
    }
}

impl From<&Reactive> for WatchSource<Reactive> {
    fn from(r: &Reactive) -> Self {
        r.clone().into()
    }
}

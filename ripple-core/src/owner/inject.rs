//! Provide / Inject
//!
//! Values provided by an owner are visible to all of its descendants. Each
//! owner starts out sharing its parent's provisions; the first `provide`
//! gives it its own layer chained to the parent's, so lookups walk up the
//! tree without copying. Values provided outside any owner are app-level and
//! visible to root owners.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use super::instance::current_owner;
use crate::config::dev_warn;

/// A typed name for a provided value.
///
/// ```rust,ignore
/// const THEME: InjectionKey<String> = InjectionKey::new("theme");
/// provide(&THEME, "dark".to_string());
/// let theme = inject(&THEME);
/// ```
pub struct InjectionKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> InjectionKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for InjectionKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for InjectionKey<T> {}

impl<T> fmt::Debug for InjectionKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InjectionKey").field(&self.name).finish()
    }
}

/// One layer of provided values.
#[derive(Default)]
pub(crate) struct Provides {
    parent: Option<Rc<Provides>>,
    values: RefCell<HashMap<&'static str, Rc<dyn Any>>>,
}

impl Provides {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    pub(crate) fn layer(parent: Rc<Provides>) -> Self {
        Self {
            parent: Some(parent),
            values: RefCell::new(HashMap::new()),
        }
    }

    fn insert(&self, name: &'static str, value: Rc<dyn Any>) {
        self.values.borrow_mut().insert(name, value);
    }

    fn lookup(&self, name: &str) -> Option<Rc<dyn Any>> {
        if let Some(value) = self.values.borrow().get(name) {
            return Some(Rc::clone(value));
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }
}

thread_local! {
    static APP_PROVIDES: Rc<Provides> = Rc::new(Provides::root());
}

/// Provide `value` to the current owner's descendants, or app-wide when no
/// owner is current.
pub fn provide<T: Clone + 'static>(key: &InjectionKey<T>, value: T) {
    let value: Rc<dyn Any> = Rc::new(value);
    match current_owner() {
        Some(owner) => owner.own_provides().insert(key.name, value),
        None => APP_PROVIDES.with(|app| app.insert(key.name, value)),
    }
}

/// Look up a value provided by an ancestor (or app-wide, for root owners).
///
/// Returns `None` outside an owner, when nothing was provided under the key,
/// or when the provided value has a different type.
pub fn inject<T: Clone + 'static>(key: &InjectionKey<T>) -> Option<T> {
    let Some(owner) = current_owner() else {
        dev_warn!(key = key.name, "inject() called with no current owner");
        return None;
    };

    let found = match owner.parent() {
        Some(parent) => parent.provides().lookup(key.name),
        None => APP_PROVIDES.with(|app| app.lookup(key.name)),
    };
    found.and_then(|value| value.downcast_ref::<T>().cloned())
}

/// [`inject`] with a fallback value.
pub fn inject_or<T: Clone + 'static>(key: &InjectionKey<T>, default: T) -> T {
    inject(key).unwrap_or(default)
}

/// [`inject`] with a lazily built fallback.
pub fn inject_or_else<T: Clone + 'static>(key: &InjectionKey<T>, default: impl FnOnce() -> T) -> T {
    inject(key).unwrap_or_else(default)
}

//! Effect Scopes
//!
//! A scope collects the effects created while it is running so they can be
//! stopped together. Owners use one scope each; framework code can create
//! its own. Scopes nest: a scope created while another is running becomes
//! its child and is stopped with it, unless created detached.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::effect::ReactiveEffect;
use crate::config::dev_warn;
use crate::error::{call_with_error_handling, ErrorSource, ReactiveError};

thread_local! {
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeInner {
    active: Cell<bool>,
    effects: RefCell<Vec<ReactiveEffect>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<Vec<EffectScope>>,
    parent: Option<Weak<ScopeInner>>,
}

/// A bundle of effects that are stopped together.
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

impl EffectScope {
    /// Create a scope, attached to the currently running scope if any.
    pub fn new() -> Self {
        let parent = current_scope();
        let scope = Self::build(parent.as_ref().map(|p| Rc::downgrade(&p.inner)));
        if let Some(parent) = parent {
            if parent.is_active() {
                parent.inner.children.borrow_mut().push(scope.clone());
            }
        }
        scope
    }

    /// Create a scope that is never stopped by an enclosing scope.
    pub fn detached() -> Self {
        Self::build(None)
    }

    fn build(parent: Option<Weak<ScopeInner>>) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                active: Cell::new(true),
                effects: RefCell::new(Vec::new()),
                cleanups: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
                parent,
            }),
        }
    }

    /// Run `f` with this scope collecting new effects.
    ///
    /// Returns `None` without running `f` if the scope was stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            dev_warn!("{}", ReactiveError::InactiveScope);
            return None;
        }
        let _guard = self.enter();
        Some(f())
    }

    /// Make this the current scope until the guard drops.
    pub(crate) fn enter(&self) -> ScopeGuard {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        ScopeGuard(())
    }

    /// Stop every effect and child scope, then run dispose callbacks.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        if !self.inner.active.replace(false) {
            return;
        }

        let effects = std::mem::take(&mut *self.inner.effects.borrow_mut());
        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        let cleanups = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
        tracing::debug!(
            effects = effects.len(),
            children = children.len(),
            cleanups = cleanups.len(),
            "stopping effect scope"
        );

        for effect in &effects {
            effect.stop();
        }
        for child in &children {
            child.stop();
        }
        for cleanup in cleanups {
            call_with_error_handling(ErrorSource::ScopeDispose, cleanup);
        }

        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(&child.inner, &self.inner));
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Number of live effects collected by this scope.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    /// Register a callback to run when this scope stops.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        if self.is_active() {
            self.inner.cleanups.borrow_mut().push(Box::new(f));
        }
    }

    pub(crate) fn record(&self, effect: &ReactiveEffect) {
        if self.is_active() {
            self.inner.effects.borrow_mut().push(effect.clone());
        }
    }

    /// Release an effect that was stopped on its own.
    pub(crate) fn forget(&self, effect: &ReactiveEffect) {
        self.inner.effects.borrow_mut().retain(|e| e != effect);
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for EffectScope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.inner.active.get())
            .field("effects", &self.inner.effects.borrow().len())
            .field("children", &self.inner.children.borrow().len())
            .finish()
    }
}

/// Pops the scope stack on drop.
pub(crate) struct ScopeGuard(());

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let popped = SCOPE_STACK.with(|stack| stack.borrow_mut().pop());
        drop(popped);
    }
}

/// The scope currently collecting effects.
pub fn current_scope() -> Option<EffectScope> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Register a callback on the current scope. Returns false outside a scope.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) -> bool {
    match current_scope() {
        Some(scope) => {
            scope.on_dispose(f);
            true
        }
        None => {
            dev_warn!("on_scope_dispose() called with no active effect scope");
            false
        }
    }
}

pub(crate) fn record_in_current(effect: &ReactiveEffect) {
    if let Some(scope) = current_scope() {
        scope.record(effect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{effect, make_ref, EffectOptions};

    #[test]
    fn scope_collects_and_stops_effects() {
        let count = make_ref(0);
        let runs = Rc::new(Cell::new(0));
        let scope = EffectScope::new();

        let (c, r) = (count.clone(), runs.clone());
        scope.run(move || {
            let _ = effect(
                move || {
                    c.get();
                    r.set(r.get() + 1);
                },
                EffectOptions::default(),
            );
        });
        assert_eq!(scope.effect_count(), 1);

        count.set(1);
        assert_eq!(runs.get(), 2);

        scope.stop();
        count.set(2);
        assert_eq!(runs.get(), 2);
        assert!(!scope.is_active());
    }

    #[test]
    fn stopped_scope_refuses_to_run() {
        let scope = EffectScope::detached();
        scope.stop();
        assert_eq!(scope.run(|| 1), None);
    }

    #[test]
    fn child_scopes_stop_with_parent() {
        let parent = EffectScope::new();
        let child = parent.run(EffectScope::new).unwrap();
        let detached = parent.run(EffectScope::detached).unwrap();

        parent.stop();
        assert!(!child.is_active());
        assert!(detached.is_active());
    }

    #[test]
    fn dispose_callbacks_run_once() {
        let disposed = Rc::new(Cell::new(0));
        let scope = EffectScope::new();

        let d = disposed.clone();
        let registered = scope.run(move || on_scope_dispose(move || d.set(d.get() + 1)));
        assert_eq!(registered, Some(true));
        assert!(!on_scope_dispose(|| {}));

        scope.stop();
        scope.stop();
        assert_eq!(disposed.get(), 1);
    }

    #[test]
    fn explicit_scope_option_wins() {
        let outer = EffectScope::new();
        let target = EffectScope::new();

        let t = target.clone();
        outer.run(move || {
            let _ = effect(|| {}, EffectOptions::default().scope(&t));
        });

        assert_eq!(outer.effect_count(), 0);
        assert_eq!(target.effect_count(), 1);
    }
}

//! Effect Implementation
//!
//! An effect is a computation that re-runs whenever something it read
//! changes.
//!
//! # How Effects Work
//!
//! 1. Unless created lazy, the effect runs its function immediately to
//!    establish initial dependencies.
//!
//! 2. When any dependency changes, the effect is notified. With a scheduler
//!    the scheduler decides when (and whether) to re-run; without one the
//!    effect re-runs synchronously inside the write.
//!
//! 3. Before re-running, the effect clears its old subscriptions and records
//!    new ones during execution. Branches not taken in the latest run stop
//!    notifying it.
//!
//! # Re-entrancy
//!
//! An effect that is already on the running stack never starts again. A
//! write inside an effect's own run does not notify that effect unless it
//! was created with `allow_recurse`.
//!
//! # Lifetime
//!
//! The runtime only holds weak references. An effect stays alive while a
//! handle to it exists, either held by the caller or recorded by the
//! [`EffectScope`] that was active at creation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::scope::{self, EffectScope};
use super::subscriber::{DebuggerEvent, DepKey, SubscriberId, TargetId};
use crate::error::{call_with_error_handling, ErrorSource};

/// Decides what happens when an effect is notified.
pub type EffectScheduler = Rc<dyn Fn(&ReactiveEffect)>;

/// Receives track or trigger events in debug builds of an app.
pub type DebugHook = Rc<dyn Fn(&DebuggerEvent)>;

/// Options accepted by [`effect`] and [`ReactiveEffect::new`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    pub(crate) lazy: bool,
    pub(crate) scheduler: Option<EffectScheduler>,
    pub(crate) on_track: Option<DebugHook>,
    pub(crate) on_trigger: Option<DebugHook>,
    pub(crate) on_stop: Option<Rc<dyn Fn()>>,
    pub(crate) allow_recurse: bool,
    pub(crate) computed: bool,
    pub(crate) scope: Option<EffectScope>,
}

impl EffectOptions {
    /// Do not run on creation.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Route notifications through `scheduler` instead of re-running.
    pub fn scheduler(mut self, scheduler: impl Fn(&ReactiveEffect) + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    pub fn on_track(mut self, hook: impl Fn(&DebuggerEvent) + 'static) -> Self {
        self.on_track = Some(Rc::new(hook));
        self
    }

    pub fn on_trigger(mut self, hook: impl Fn(&DebuggerEvent) + 'static) -> Self {
        self.on_trigger = Some(Rc::new(hook));
        self
    }

    /// Called once, when the effect is stopped.
    pub fn on_stop(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_stop = Some(Rc::new(hook));
        self
    }

    /// Let writes made during the effect's own run notify it again.
    pub fn allow_recurse(mut self) -> Self {
        self.allow_recurse = true;
        self
    }

    /// Record the effect in `scope` instead of the currently active one.
    pub fn scope(mut self, scope: &EffectScope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub(crate) fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub(crate) fn scheduler_rc(mut self, scheduler: EffectScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub(crate) fn debug_hooks(
        mut self,
        on_track: Option<DebugHook>,
        on_trigger: Option<DebugHook>,
    ) -> Self {
        self.on_track = on_track;
        self.on_trigger = on_trigger;
        self
    }
}

pub(crate) struct EffectInner {
    pub(crate) id: SubscriberId,
    func: Rc<dyn Fn()>,
    active: Cell<bool>,
    pub(crate) deps: RefCell<SmallVec<[(TargetId, DepKey); 4]>>,
    pub(crate) allow_recurse: bool,
    pub(crate) computed: bool,
    scheduler: Option<EffectScheduler>,
    on_track: Option<DebugHook>,
    on_trigger: Option<DebugHook>,
    on_stop: Option<Rc<dyn Fn()>>,
    run_count: Cell<usize>,
}

impl EffectInner {
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn on_tracked(&self, event: &DebuggerEvent) {
        if let Some(hook) = &self.on_track {
            hook(event);
        }
    }
}

impl Drop for EffectInner {
    // Dropping the last handle of a live effect stops it.
    fn drop(&mut self) {
        if self.active.replace(false) {
            tracing::trace!(effect = self.id.raw(), "effect dropped while active");
            if let Some(on_stop) = self.on_stop.take() {
                call_with_error_handling(ErrorSource::EffectRun, || on_stop());
            }
        }
        Runtime::unregister(self.id, self.deps.get_mut());
    }
}

/// A computation that re-runs when its dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = make_ref(0);
///
/// let c = count.clone();
/// let runner = effect(move || println!("count is {}", c.get()), EffectOptions::default());
///
/// count.set(5); // prints "count is 5"
/// runner.stop();
/// count.set(6); // prints nothing
/// ```
#[derive(Clone)]
#[must_use = "an effect outside a scope is stopped when its last handle drops"]
pub struct ReactiveEffect {
    inner: Rc<EffectInner>,
}

impl ReactiveEffect {
    /// Create a new effect with the given function.
    ///
    /// Runs immediately unless `options` is lazy. A panic in that first run
    /// propagates to the caller.
    pub fn new(f: impl Fn() + 'static, options: EffectOptions) -> Self {
        let inner = Rc::new(EffectInner {
            id: SubscriberId::new(),
            func: Rc::new(f),
            active: Cell::new(true),
            deps: RefCell::new(SmallVec::new()),
            allow_recurse: options.allow_recurse,
            computed: options.computed,
            scheduler: options.scheduler,
            on_track: options.on_track,
            on_trigger: options.on_trigger,
            on_stop: options.on_stop,
            run_count: Cell::new(0),
        });
        Runtime::register(&inner);

        let effect = Self { inner };
        match &options.scope {
            Some(scope) => scope.record(&effect),
            None => scope::record_in_current(&effect),
        }

        if !options.lazy {
            effect.run();
        }
        effect
    }

    pub(crate) fn from_inner(inner: Rc<EffectInner>) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Rc<EffectInner> {
        &self.inner
    }

    /// Get the subscriber ID for this effect.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Run the effect function, re-recording its dependencies.
    ///
    /// Does nothing if the effect is stopped or already running.
    pub fn run(&self) {
        let inner = &self.inner;
        if !inner.active.get() {
            return;
        }
        if ReactiveContext::is_running(inner.id) {
            tracing::trace!(effect = inner.id.raw(), "skipping re-entrant run");
            return;
        }

        Runtime::cleanup(inner);
        let func = Rc::clone(&inner.func);
        let _ctx = ReactiveContext::enter(Rc::clone(inner));
        inner.run_count.set(inner.run_count.get() + 1);
        func();
    }

    /// Stop the effect.
    ///
    /// Removes every subscription and calls the `on_stop` hook. Stopping an
    /// already stopped effect does nothing.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.active.replace(false) {
            return;
        }
        Runtime::cleanup(inner);
        tracing::trace!(effect = inner.id.raw(), "effect stopped");
        if let Some(on_stop) = &inner.on_stop {
            on_stop();
        }
    }

    /// Deliver a change notification.
    ///
    /// Panics from the scheduler or the re-run are contained and reported.
    pub(crate) fn notify(&self, event: &DebuggerEvent) {
        let inner = &self.inner;
        if !inner.active.get() {
            return;
        }
        if let Some(hook) = inner.on_trigger.clone() {
            call_with_error_handling(ErrorSource::DebugHook, || hook(event));
        }
        match inner.scheduler.clone() {
            Some(scheduler) => {
                call_with_error_handling(ErrorSource::Scheduler, || scheduler(self));
            }
            None => {
                call_with_error_handling(ErrorSource::EffectRun, || self.run());
            }
        }
    }

    /// Check if the effect is still live.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of dependencies recorded by the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    pub fn downgrade(&self) -> WeakEffect {
        WeakEffect(Rc::downgrade(&self.inner))
    }
}

impl PartialEq for ReactiveEffect {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ReactiveEffect {}

impl fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.inner.id)
            .field("active", &self.inner.active.get())
            .field("deps", &self.inner.deps.borrow().len())
            .field("run_count", &self.inner.run_count.get())
            .finish()
    }
}

/// Non-owning handle to an effect.
#[derive(Clone)]
pub struct WeakEffect(Weak<EffectInner>);

impl WeakEffect {
    pub fn upgrade(&self) -> Option<ReactiveEffect> {
        self.0.upgrade().map(ReactiveEffect::from_inner)
    }
}

/// An effect whose function returns a value.
///
/// Returned by [`effect`]. Dereferences to the underlying
/// [`ReactiveEffect`], so it can be stopped or inspected directly.
#[must_use = "an effect outside a scope is stopped when its last handle drops"]
pub struct EffectRunner<R> {
    effect: ReactiveEffect,
    output: Rc<RefCell<Option<R>>>,
}

impl<R: 'static> EffectRunner<R> {
    /// Force a run and return the function's result.
    ///
    /// Returns `None` if the effect is stopped or already running.
    pub fn run(&self) -> Option<R> {
        self.output.borrow_mut().take();
        self.effect.run();
        self.output.borrow_mut().take()
    }

    pub fn effect(&self) -> &ReactiveEffect {
        &self.effect
    }
}

impl<R> Clone for EffectRunner<R> {
    fn clone(&self) -> Self {
        Self {
            effect: self.effect.clone(),
            output: Rc::clone(&self.output),
        }
    }
}

impl<R> std::ops::Deref for EffectRunner<R> {
    type Target = ReactiveEffect;

    fn deref(&self) -> &ReactiveEffect {
        &self.effect
    }
}

impl<R> fmt::Debug for EffectRunner<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EffectRunner").field(&self.effect).finish()
    }
}

/// Create an effect. See [`ReactiveEffect::new`].
///
/// The latest result of `f` is handed back by [`EffectRunner::run`].
pub fn effect<R: 'static>(
    f: impl Fn() -> R + 'static,
    options: EffectOptions,
) -> EffectRunner<R> {
    let output = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&output);
    let effect = ReactiveEffect::new(
        move || {
            let value = f();
            *slot.borrow_mut() = Some(value);
        },
        options,
    );
    EffectRunner { effect, output }
}

/// Stop an effect. See [`ReactiveEffect::stop`].
pub fn stop(effect: &ReactiveEffect) {
    effect.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{make_ref, reactive, Object, Value};

    #[test]
    fn effect_runs_immediately() {
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();

        let effect = effect(move || r.set(r.get() + 1), EffectOptions::default());

        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn lazy_effect_waits_for_run() {
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();

        let effect = effect(move || r.set(r.get() + 1), EffectOptions::default().lazy());
        assert_eq!(runs.get(), 0);

        effect.run();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_reruns_on_change() {
        let count = make_ref(0);
        let seen = Rc::new(Cell::new(-1));

        let (c, s) = (count.clone(), seen.clone());
        let _effect = effect(move || s.set(c.get()), EffectOptions::default());
        assert_eq!(seen.get(), 0);

        count.set(7);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn stopped_effect_does_not_run() {
        let count = make_ref(0);
        let runs = Rc::new(Cell::new(0));
        let stops = Rc::new(Cell::new(0));

        let (c, r, s) = (count.clone(), runs.clone(), stops.clone());
        let runner = effect(
            move || {
                c.get();
                r.set(r.get() + 1);
            },
            EffectOptions::default().on_stop(move || s.set(s.get() + 1)),
        );

        stop(&runner);
        stop(&runner);
        count.set(1);
        runner.run();

        assert_eq!(runs.get(), 1);
        assert_eq!(stops.get(), 1);
        assert!(!runner.is_active());
        assert_eq!(runner.dependency_count(), 0);
    }

    #[test]
    fn scheduler_replaces_rerun() {
        let count = make_ref(0);
        let scheduled = Rc::new(Cell::new(0));
        let runs = Rc::new(Cell::new(0));

        let (c, r, s) = (count.clone(), runs.clone(), scheduled.clone());
        let _effect = effect(
            move || {
                c.get();
                r.set(r.get() + 1);
            },
            EffectOptions::default().scheduler(move |_| s.set(s.get() + 1)),
        );

        count.set(1);
        assert_eq!(scheduled.get(), 1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn branch_switching_drops_stale_dependencies() {
        let flag = make_ref(true);
        let a = make_ref(0);
        let b = make_ref(0);
        let runs = Rc::new(Cell::new(0));

        let (f, ar, br, r) = (flag.clone(), a.clone(), b.clone(), runs.clone());
        let _effect = effect(
            move || {
                r.set(r.get() + 1);
                if f.get() {
                    ar.get();
                } else {
                    br.get();
                }
            },
            EffectOptions::default(),
        );

        flag.set(false);
        assert_eq!(runs.get(), 2);

        a.set(1);
        assert_eq!(runs.get(), 2);

        b.set(1);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn self_write_does_not_loop() {
        let count = make_ref(0);
        let c = count.clone();

        let runner = effect(move || c.set(c.get() + 1), EffectOptions::default());

        assert_eq!(count.get_untracked(), 1);
        assert_eq!(runner.run_count(), 1);
    }

    #[test]
    fn debug_hooks_receive_events() {
        let state = reactive(Object::from_pairs([("a", 1)]));
        let Value::Reactive(state) = state else {
            panic!("expected a reactive container");
        };
        let tracked = Rc::new(Cell::new(0));
        let triggered = Rc::new(Cell::new(0));

        let (s, tk, tg) = (state.clone(), tracked.clone(), triggered.clone());
        let _effect = effect(
            move || {
                s.get("a");
            },
            EffectOptions::default()
                .on_track(move |_| tk.set(tk.get() + 1))
                .on_trigger(move |_| tg.set(tg.get() + 1)),
        );

        state.set("a", 2);
        assert_eq!(tracked.get(), 2);
        assert_eq!(triggered.get(), 1);
    }

    #[test]
    fn panicking_rerun_is_contained() {
        let count = make_ref(0);
        let c = count.clone();
        let _effect = effect(
            move || {
                if c.get() == 1 {
                    panic!("boom");
                }
            },
            EffectOptions::default(),
        );

        count.set(1);
        count.set(2);
        assert_eq!(count.get_untracked(), 2);
    }

    #[test]
    fn runner_returns_the_result() {
        let count = make_ref(2);
        let c = count.clone();
        let runner = effect(move || c.get() * 10, EffectOptions::default());

        count.set(3);
        assert_eq!(runner.run(), Some(30));
        assert_eq!(runner.run_count(), 3);

        runner.stop();
        assert_eq!(runner.run(), None);
    }

    #[test]
    fn effect_stopping_itself_keeps_no_subscriptions() {
        let a = make_ref(0);
        let b = make_ref(0);
        let me: Rc<RefCell<Option<WeakEffect>>> = Rc::default();

        let (ar, br, m) = (a.clone(), b.clone(), me.clone());
        let runner = effect(
            move || {
                if ar.get() == 1 {
                    let current = m.borrow().as_ref().and_then(WeakEffect::upgrade);
                    if let Some(current) = current {
                        current.stop();
                    }
                }
                br.get();
            },
            EffectOptions::default(),
        );
        *me.borrow_mut() = Some(runner.downgrade());
        assert_eq!(Runtime::subscriber_count(b.id(), &DepKey::Value), 1);

        a.set(1);
        assert!(!runner.is_active());
        assert_eq!(runner.dependency_count(), 0);
        assert_eq!(Runtime::subscriber_count(a.id(), &DepKey::Value), 0);
        assert_eq!(Runtime::subscriber_count(b.id(), &DepKey::Value), 0);
    }

    #[test]
    fn dropping_last_handle_stops_the_effect() {
        let count = make_ref(0);
        let runs = Rc::new(Cell::new(0));
        let stops = Rc::new(Cell::new(0));

        let (c, r, s) = (count.clone(), runs.clone(), stops.clone());
        let runner = effect(
            move || {
                c.get();
                r.set(r.get() + 1);
            },
            EffectOptions::default().on_stop(move || s.set(s.get() + 1)),
        );
        let weak = runner.downgrade();

        drop(runner);
        assert!(weak.upgrade().is_none());
        assert_eq!(stops.get(), 1);

        count.set(1);
        assert_eq!(runs.get(), 1);
        assert_eq!(Runtime::subscriber_count(count.id(), &DepKey::Value), 0);
    }
}

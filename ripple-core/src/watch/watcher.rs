//! Watchers
//!
//! A watcher is a lazy effect whose getter reads a source, plus a job that
//! compares the new value with the previous one and calls back on change.
//! When the job runs is decided by [`FlushTiming`].

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::source::WatchSource;
use crate::error::{call_with_error_handling_in, CallbackReturn, ErrorSource};
use crate::owner::{current_owner, Owner, WeakOwner};
use crate::reactive::{
    current_scope, DebugHook, DebuggerEvent, EffectOptions, EffectScheduler, EffectScope,
    ReactiveEffect, ReactiveValue, Seen, WeakEffect,
};
use crate::scheduler::{queue_post_flush_cb, queue_pre_flush_cb, Job};

/// When a triggered watcher runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushTiming {
    /// Before owner updates in the next flush. Runs synchronously while the
    /// owning component is still being set up.
    #[default]
    Pre,

    /// After owner updates in the next flush.
    Post,

    /// Inside the write that triggered it.
    Sync,
}

/// Options for [`watch`] and [`watch_effect`].
#[derive(Clone, Default)]
pub struct WatchOptions {
    pub(crate) immediate: bool,
    pub(crate) deep: bool,
    pub(crate) flush: FlushTiming,
    pub(crate) on_track: Option<DebugHook>,
    pub(crate) on_trigger: Option<DebugHook>,
}

impl WatchOptions {
    /// Call back once at creation with no old value.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Track every nested value and call back on every trigger.
    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn flush(mut self, timing: FlushTiming) -> Self {
        self.flush = timing;
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
}

impl fmt::Debug for WatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchOptions")
            .field("immediate", &self.immediate)
            .field("deep", &self.deep)
            .field("flush", &self.flush)
            .finish_non_exhaustive()
    }
}

/// Registers the cleanup for the current callback run.
///
/// The cleanup runs right before the next callback run, or when the watcher
/// stops. Registering twice keeps only the latest one.
#[derive(Clone, Default)]
pub struct OnCleanup {
    slot: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl OnCleanup {
    pub fn register(&self, f: impl FnOnce() + 'static) {
        *self.slot.borrow_mut() = Some(Box::new(f));
    }

    pub(crate) fn run(&self, owner: Option<&Owner>) {
        let cleanup = self.slot.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            call_with_error_handling_in(owner, ErrorSource::WatchCleanup, cleanup);
        }
    }
}

/// Stops a watcher.
///
/// Inside an owner's setup or an [`EffectScope`], the scope keeps the
/// watcher alive. Anywhere else the watcher lives as long as this handle.
/// Dropping the last handle stops it, running any pending cleanup.
#[derive(Debug, Clone)]
#[must_use = "a watcher outside a scope is stopped when its last handle drops"]
pub struct WatchHandle {
    effect: ReactiveEffect,
    scope: Option<EffectScope>,
}

impl WatchHandle {
    /// Stop the watcher and run its pending cleanup. Idempotent.
    pub fn stop(&self) {
        self.effect.stop();
        if let Some(scope) = &self.scope {
            scope.forget(&self.effect);
        }
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    /// The underlying effect.
    pub fn effect(&self) -> &ReactiveEffect {
        &self.effect
    }
}

fn upgrade(owner: &Option<WeakOwner>) -> Option<Owner> {
    owner.as_ref().and_then(WeakOwner::upgrade)
}

fn scheduler_for(flush: FlushTiming, job: &Job, owner: Option<WeakOwner>) -> EffectScheduler {
    let job = job.clone();
    match flush {
        FlushTiming::Sync => Rc::new(move |_: &ReactiveEffect| job.invoke()),
        FlushTiming::Post => Rc::new(move |_: &ReactiveEffect| queue_post_flush_cb(&job)),
        FlushTiming::Pre => Rc::new(move |_: &ReactiveEffect| match upgrade(&owner) {
            Some(owner) if !owner.is_mounted() => job.invoke(),
            _ => queue_pre_flush_cb(&job),
        }),
    }
}

fn effect_options(
    options: &WatchOptions,
    scheduler: EffectScheduler,
    cleanup: &OnCleanup,
    owner: &Option<WeakOwner>,
) -> EffectOptions {
    let (cleanup, owner) = (cleanup.clone(), owner.clone());
    EffectOptions::default()
        .lazy()
        .scheduler_rc(scheduler)
        .debug_hooks(options.on_track.clone(), options.on_trigger.clone())
        .on_stop(move || cleanup.run(upgrade(&owner).as_ref()))
}

/// Watch `source` and call `callback(new, old, on_cleanup)` when it changes.
///
/// `old` is `None` on the first call. With `deep`, or for a reactive object
/// source, every trigger calls back even if the value is the same handle.
///
/// # Example
///
/// ```rust,ignore
/// let count = make_ref(0);
/// let handle = watch(&count, |new, old, _| {
///     println!("{old:?} -> {new}");
/// }, WatchOptions::default());
///
/// count.set(1);
/// flush(); // prints "Some(0) -> 1"
/// handle.stop();
/// ```
pub fn watch<T, F, R>(
    source: impl Into<WatchSource<T>>,
    callback: F,
    options: WatchOptions,
) -> WatchHandle
where
    T: ReactiveValue,
    F: Fn(&T, Option<&T>, &OnCleanup) -> R + 'static,
    R: CallbackReturn,
{
    let source = source.into();
    let deep = options.deep || source.is_deep();
    let force_trigger = source.is_shallow_ref();
    let owner = current_owner().map(|o| o.downgrade());

    let latest: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let old: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let cleanup = OnCleanup::default();
    let runner: Rc<OnceCell<WeakEffect>> = Rc::new(OnceCell::new());

    let getter = {
        let latest = latest.clone();
        move || {
            let value = source.read();
            if deep {
                value.traverse(&mut Seen::new());
            }
            *latest.borrow_mut() = Some(value);
        }
    };

    let job = {
        let (runner, latest, old) = (runner.clone(), latest.clone(), old.clone());
        let (cleanup, owner) = (cleanup.clone(), owner.clone());
        Job::new(move || {
            let Some(effect) = runner.get().and_then(WeakEffect::upgrade) else {
                return;
            };
            if !effect.is_active() {
                return;
            }
            let owner = upgrade(&owner);
            let owner = owner.as_ref();

            let ran = call_with_error_handling_in(owner, ErrorSource::WatchGetter, || effect.run());
            if ran.is_none() {
                return;
            }
            let Some(new) = latest.borrow_mut().take() else {
                return;
            };

            let previous = old.borrow().clone();
            let changed = previous.as_ref().map_or(true, |prev| new.has_changed(prev));
            if deep || force_trigger || changed {
                cleanup.run(owner);
                let returned = call_with_error_handling_in(owner, ErrorSource::WatchCallback, || {
                    callback(&new, previous.as_ref(), &cleanup)
                });
                if let Some(returned) = returned {
                    returned.report(owner, ErrorSource::WatchCallback);
                }
                *old.borrow_mut() = Some(new);
            }
        })
    };
    job.set_allow_recurse(true);

    let scheduler = scheduler_for(options.flush, &job, owner.clone());
    let effect = ReactiveEffect::new(getter, effect_options(&options, scheduler, &cleanup, &owner));
    let _ = runner.set(effect.downgrade());

    if options.immediate {
        job.invoke();
    } else {
        let current = upgrade(&owner);
        let ran = call_with_error_handling_in(current.as_ref(), ErrorSource::WatchGetter, || {
            effect.run()
        });
        if ran.is_some() {
            *old.borrow_mut() = latest.borrow_mut().take();
        }
    }

    WatchHandle {
        effect,
        scope: current_scope(),
    }
}

/// Watch several sources of the same type at once.
///
/// The callback receives every source's value, in order. Reactive object
/// sources are traversed deeply.
pub fn watch_many<T, F, R>(
    sources: Vec<WatchSource<T>>,
    callback: F,
    options: WatchOptions,
) -> WatchHandle
where
    T: ReactiveValue,
    F: Fn(&Vec<T>, Option<&Vec<T>>, &OnCleanup) -> R + 'static,
    R: CallbackReturn,
{
    let getter = WatchSource::getter(move || {
        sources
            .iter()
            .map(|source| {
                let value = source.read();
                if source.is_deep() {
                    value.traverse(&mut Seen::new());
                }
                value
            })
            .collect::<Vec<T>>()
    });
    watch(getter, callback, options)
}

/// Run `f` now and again whenever anything it read changes.
///
/// `f` receives an [`OnCleanup`]; the registered cleanup runs before the
/// next run and when the watcher stops. With [`FlushTiming::Post`] the first
/// run is queued instead of immediate.
pub fn watch_effect<F, R>(f: F, options: WatchOptions) -> WatchHandle
where
    F: Fn(&OnCleanup) -> R + 'static,
    R: CallbackReturn,
{
    let owner = current_owner().map(|o| o.downgrade());
    let cleanup = OnCleanup::default();
    let runner: Rc<OnceCell<WeakEffect>> = Rc::new(OnceCell::new());

    let body = {
        let (cleanup, owner) = (cleanup.clone(), owner.clone());
        move || {
            let owner = upgrade(&owner);
            if owner.as_ref().is_some_and(Owner::is_unmounted) {
                return;
            }
            let owner = owner.as_ref();
            cleanup.run(owner);
            let returned =
                call_with_error_handling_in(owner, ErrorSource::WatchCallback, || f(&cleanup));
            if let Some(returned) = returned {
                returned.report(owner, ErrorSource::WatchCallback);
            }
        }
    };

    let job = {
        let runner = runner.clone();
        Job::new(move || {
            if let Some(effect) = runner.get().and_then(WeakEffect::upgrade) {
                effect.run();
            }
        })
    };

    let scheduler = scheduler_for(options.flush, &job, owner.clone());
    let effect = ReactiveEffect::new(body, effect_options(&options, scheduler, &cleanup, &owner));
    let _ = runner.set(effect.downgrade());

    if options.flush == FlushTiming::Post {
        queue_post_flush_cb(&job);
    } else {
        effect.run();
    }

    WatchHandle {
        effect,
        scope: current_scope(),
    }
}

/// [`watch_effect`] with post flush timing.
pub fn watch_post_effect<F, R>(f: F) -> WatchHandle
where
    F: Fn(&OnCleanup) -> R + 'static,
    R: CallbackReturn,
{
    watch_effect(f, WatchOptions::default().flush(FlushTiming::Post))
}

/// [`watch_effect`] with sync flush timing.
pub fn watch_sync_effect<F, R>(f: F) -> WatchHandle
where
    F: Fn(&OnCleanup) -> R + 'static,
    R: CallbackReturn,
{
    watch_effect(f, WatchOptions::default().flush(FlushTiming::Sync))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{make_ref, reactive, shallow_ref, trigger_ref, Object, Value};
    use crate::scheduler::flush;
    use std::cell::Cell;

    type Calls<T> = Rc<RefCell<Vec<(T, Option<T>)>>>;

    fn recorder<T: Clone + 'static>() -> (Calls<T>, impl Fn(&T, Option<&T>, &OnCleanup) + 'static) {
        let calls: Calls<T> = Rc::new(RefCell::new(Vec::new()));
        let c = calls.clone();
        (calls, move |new: &T, old: Option<&T>, _: &OnCleanup| {
            c.borrow_mut().push((new.clone(), old.cloned()))
        })
    }

    #[test]
    fn callback_waits_for_change_and_flush() {
        let count = make_ref(0);
        let (calls, cb) = recorder();
        let _handle = watch(&count, cb, WatchOptions::default());
        assert!(calls.borrow().is_empty());

        count.set(1);
        assert!(calls.borrow().is_empty());

        flush();
        assert_eq!(*calls.borrow(), vec![(1, Some(0))]);
    }

    #[test]
    fn immediate_calls_back_synchronously() {
        let count = make_ref(5);
        let (calls, cb) = recorder();
        let _handle = watch(&count, cb, WatchOptions::default().immediate());
        assert_eq!(*calls.borrow(), vec![(5, None)]);
    }

    #[test]
    fn several_writes_before_flush_call_back_once() {
        let count = make_ref(0);
        let (calls, cb) = recorder();
        let _handle = watch(&count, cb, WatchOptions::default());

        count.set(1);
        count.set(2);
        count.set(3);
        flush();
        assert_eq!(*calls.borrow(), vec![(3, Some(0))]);
    }

    #[test]
    fn reverting_before_flush_is_not_a_change() {
        let count = make_ref(0);
        let (calls, cb) = recorder();
        let _handle = watch(&count, cb, WatchOptions::default());

        count.set(1);
        count.set(0);
        flush();
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn sync_flush_calls_back_inside_the_write() {
        let count = make_ref(0);
        let (calls, cb) = recorder();
        let _handle = watch(&count, cb, WatchOptions::default().flush(FlushTiming::Sync));

        count.set(1);
        count.set(2);
        assert_eq!(*calls.borrow(), vec![(1, Some(0)), (2, Some(1))]);
    }

    #[test]
    fn deep_watch_sees_nested_mutation() {
        let inner = Object::from_pairs([("b", 1)]);
        let state = reactive(Object::from_pairs([("a", Value::Object(inner))]));
        let state = state.as_reactive().cloned().expect("object wraps");

        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let _handle = watch(&state, move |_, _, _| r.set(r.get() + 1), WatchOptions::default());

        let nested = state.get("a");
        nested.as_reactive().expect("nested object is wrapped").set("b", 2);
        flush();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn nan_is_not_a_change() {
        let n = make_ref(f64::NAN);
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let _handle = watch(&n, move |_, _, _| r.set(r.get() + 1), WatchOptions::default().flush(FlushTiming::Sync));

        n.set(f64::NAN);
        assert_eq!(runs.get(), 0);
    }

    #[test]
    fn shallow_ref_trigger_forces_callback() {
        let list = shallow_ref(vec![1]);
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let _handle = watch(&list, move |_, _, _| r.set(r.get() + 1), WatchOptions::default().flush(FlushTiming::Sync));

        trigger_ref(&list);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn cleanup_runs_before_next_callback_and_on_stop() {
        let count = make_ref(0);
        let cleanups = Rc::new(Cell::new(0));

        let c = cleanups.clone();
        let handle = watch(
            &count,
            move |_, _, on_cleanup| {
                let c = c.clone();
                on_cleanup.register(move || c.set(c.get() + 1));
            },
            WatchOptions::default().flush(FlushTiming::Sync),
        );

        count.set(1);
        assert_eq!(cleanups.get(), 0);
        count.set(2);
        assert_eq!(cleanups.get(), 1);

        handle.stop();
        assert_eq!(cleanups.get(), 2);
        handle.stop();
        assert_eq!(cleanups.get(), 2);
    }

    #[test]
    fn stopped_watcher_never_calls_back() {
        let count = make_ref(0);
        let (calls, cb) = recorder();
        let handle = watch(&count, cb, WatchOptions::default());

        count.set(1);
        handle.stop();
        flush();
        count.set(2);
        flush();
        assert!(calls.borrow().is_empty());
        assert!(!handle.is_active());
    }

    #[test]
    fn callback_may_write_its_own_source() {
        let count = make_ref(0);
        let c = count.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _handle = watch(
            &count,
            move |new: &i32, _, _| {
                s.borrow_mut().push(*new);
                if *new < 3 {
                    c.set(new + 1);
                }
            },
            WatchOptions::default(),
        );

        count.set(1);
        flush();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn watch_many_reports_all_values() {
        let a = make_ref(1);
        let b = make_ref(2);
        let (calls, cb) = recorder();
        let _handle = watch_many(vec![(&a).into(), (&b).into()], cb, WatchOptions::default());

        b.set(3);
        flush();
        assert_eq!(*calls.borrow(), vec![(vec![1, 3], Some(vec![1, 2]))]);
    }

    #[test]
    fn watch_effect_reruns_with_cleanup() {
        let count = make_ref(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let (c, l) = (count.clone(), log.clone());
        let handle = watch_effect(
            move |on_cleanup| {
                let n = c.get();
                l.borrow_mut().push(format!("run {n}"));
                let l = l.clone();
                on_cleanup.register(move || l.borrow_mut().push(format!("cleanup {n}")));
            },
            WatchOptions::default(),
        );
        assert_eq!(*log.borrow(), vec!["run 0"]);

        count.set(1);
        flush();
        handle.stop();
        assert_eq!(*log.borrow(), vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]);
    }

    #[test]
    fn post_effect_waits_for_flush() {
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let _handle = watch_post_effect(move |_| r.set(r.get() + 1));
        assert_eq!(runs.get(), 0);

        flush();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn failing_callback_result_is_contained() {
        let count = make_ref(0);
        let _handle = watch(
            &count,
            |_, _, _| -> Result<(), String> { Err("rejected".into()) },
            WatchOptions::default().flush(FlushTiming::Sync),
        );
        count.set(1);
        assert_eq!(count.get_untracked(), 1);
    }

    #[test]
    fn dropping_the_handle_runs_pending_cleanup() {
        let count = make_ref(0);
        let calls = Rc::new(Cell::new(0));
        let cleanups = Rc::new(Cell::new(0));

        let (k, c) = (calls.clone(), cleanups.clone());
        let handle = watch(
            &count,
            move |_, _, on_cleanup: &OnCleanup| {
                k.set(k.get() + 1);
                let c = c.clone();
                on_cleanup.register(move || c.set(c.get() + 1));
            },
            WatchOptions::default().flush(FlushTiming::Sync),
        );

        count.set(1);
        assert_eq!((calls.get(), cleanups.get()), (1, 0));

        drop(handle);
        assert_eq!(cleanups.get(), 1);

        count.set(2);
        assert_eq!((calls.get(), cleanups.get()), (1, 1));
    }
}

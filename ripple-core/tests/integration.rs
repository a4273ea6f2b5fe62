//! Integration Tests for the Reactive Runtime
//!
//! These tests verify that containers, refs, computeds, watchers, the
//! scheduler and owners work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Mutex;

use ripple_core::error::{set_global_error_handler, ReactiveError};
use ripple_core::owner::{
    inject, on_before_unmount, on_error_captured, on_mounted, on_unmounted, on_updated, provide,
    InjectionKey, Owner, SetupResult,
};
use ripple_core::reactive::{
    computed, effect, is_reactive, make_ref, reactive, readonly, stop, to_raw, DepKey,
    EffectOptions, EffectScope, Object, Runtime, Value,
};
use ripple_core::scheduler::{flush, has_pending_flush, next_tick, on_next_tick, queue_job, Job};
use ripple_core::watch::{watch, watch_effect, FlushTiming, WatchOptions};

fn counter() -> (Rc<Cell<usize>>, impl Fn() + Clone + 'static) {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    (count, move || c.set(c.get() + 1))
}

static UNCAPTURED: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Send uncaptured errors to a shared log. Tests run in parallel, so every
/// test that looks at the global handler installs this same one.
fn log_uncaptured_errors() {
    set_global_error_handler(|err| {
        if let Ok(mut log) = UNCAPTURED.lock() {
            log.push(err.to_string());
        }
    });
}

fn was_uncaptured(message: &str) -> bool {
    UNCAPTURED
        .lock()
        .map(|log| log.iter().any(|entry| entry == message))
        .unwrap_or(false)
}

fn wrap(object: Object) -> ripple_core::reactive::Reactive {
    reactive(object)
        .as_reactive()
        .cloned()
        .expect("objects are wrapped")
}

/// A watcher on a container key runs once per flush, however many writes
/// happened before it.
#[test]
fn writes_before_flush_run_watcher_once() {
    let state = wrap(Object::from_pairs([("k", 0)]));
    let (calls, bump) = counter();

    let s = state.clone();
    let _handle = watch(
        ripple_core::watch::WatchSource::getter(move || s.get("k")),
        move |_, _, _| bump(),
        WatchOptions::default(),
    );

    state.set("k", 1);
    state.set("k", 2);
    state.set("k", 3);
    assert_eq!(calls.get(), 0);

    flush();
    assert_eq!(calls.get(), 1);
}

/// Writing an equal value, NaN included, notifies nobody.
#[test]
fn same_value_writes_are_silent() {
    let state = wrap(Object::from_pairs([("n", Value::Number(f64::NAN)), ("s", "x".into())]));
    let (runs, bump) = counter();

    let s = state.clone();
    let _e = effect(
        move || {
            s.get("n");
            s.get("s");
            bump();
        },
        EffectOptions::default(),
    );

    assert!(!state.set("n", f64::NAN));
    assert!(!state.set("s", "x"));
    assert_eq!(runs.get(), 1);
}

/// An owner depending on two keys updates once when both change.
#[test]
fn two_keys_one_update() {
    let state = wrap(Object::from_pairs([("a", 1), ("b", 2)]));
    let (updates, bump) = counter();

    let s = state.clone();
    let component = Owner::builder()
        .on_update(bump)
        .setup(move |_| {
            Ok::<_, ()>(SetupResult::<f64>::Render(Rc::new(move || {
                s.get("a").as_f64().unwrap_or(0.0) + s.get("b").as_f64().unwrap_or(0.0)
            })))
        })
        .unwrap();
    assert_eq!(component.render(), Some(3.0));
    component.mount();

    state.set("a", 10);
    state.set("b", 20);
    flush();
    assert_eq!(updates.get(), 1);
    assert_eq!(component.render(), Some(30.0));
}

/// The getter of a computed runs only when read, and only after a change.
#[test]
fn computed_is_lazy() {
    let base = make_ref(1);
    let calls = Rc::new(Cell::new(0));

    let (b, c) = (base.clone(), calls.clone());
    let doubled = computed(move || {
        c.set(c.get() + 1);
        b.get() * 2
    });
    assert_eq!(calls.get(), 0);

    assert_eq!(doubled.get(), 2);
    assert_eq!(calls.get(), 1);
    assert_eq!(doubled.get(), 2);
    assert_eq!(calls.get(), 1);

    base.set(5);
    assert_eq!(doubled.get(), 10);
    assert_eq!(calls.get(), 2);
}

/// `immediate` calls back at creation with no old value; otherwise nothing
/// happens until the source changes.
#[test]
fn watch_immediate_and_lazy() {
    let source = make_ref(7);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let s = seen.clone();
    let _eager = watch(
        &source,
        move |new: &i32, old: Option<&i32>, _| s.borrow_mut().push((*new, old.copied())),
        WatchOptions::default().immediate(),
    );
    assert_eq!(*seen.borrow(), vec![(7, None)]);

    let (calls, bump) = counter();
    let _lazy = watch(&source, move |_, _, _| bump(), WatchOptions::default());
    flush();
    assert_eq!(calls.get(), 0);

    source.set(8);
    flush();
    assert_eq!(calls.get(), 1);
    assert_eq!(*seen.borrow(), vec![(7, None), (8, Some(7))]);
}

/// A deep watcher on a container fires once for a nested mutation.
#[test]
fn deep_watch_nested_mutation() {
    let obj = wrap(Object::from_pairs([(
        "a",
        Value::Object(Object::from_pairs([("b", 1)])),
    )]));
    let (calls, bump) = counter();
    let _handle = watch(&obj, move |_, _, _| bump(), WatchOptions::default().deep());

    obj.get("a").as_reactive().expect("nested wrap").set("b", 2);
    flush();
    assert_eq!(calls.get(), 1);
}

/// Deep traversal terminates on cyclic graphs.
#[test]
fn deep_watch_survives_cycles() {
    let raw = Object::new();
    raw.insert(&"me".into(), Value::Object(raw.clone())).unwrap();
    let obj = wrap(raw.clone());

    let (calls, bump) = counter();
    let _handle = watch(&obj, move |_, _, _| bump(), WatchOptions::default());
    obj.set("x", 1);
    flush();
    assert_eq!(calls.get(), 1);

    // Break the cycle so the object can be freed.
    raw.remove(&"me".into());
}

/// After `stop`, writes never reach the effect and its subscriptions are gone.
#[test]
fn stop_is_terminal() {
    let state = wrap(Object::from_pairs([("k", 0)]));
    let (runs, bump) = counter();

    let s = state.clone();
    let runner = effect(
        move || {
            s.get("k");
            bump();
        },
        EffectOptions::default(),
    );
    assert_eq!(Runtime::subscriber_count(state.id(), &DepKey::Prop("k".into())), 1);

    stop(&runner);
    state.set("k", 1);
    state.set("k", 2);
    assert_eq!(runs.get(), 1);
    assert_eq!(Runtime::subscriber_count(state.id(), &DepKey::Prop("k".into())), 0);
}

/// A job queued during a flush runs in that same flush.
#[test]
fn jobs_queued_during_flush_run_in_that_flush() {
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    let second = Job::new(move || o.borrow_mut().push("second"));
    let o = order.clone();
    let first = Job::new(move || {
        o.borrow_mut().push("first");
        queue_job(&second);
    });

    queue_job(&first);
    flush();
    assert_eq!(*order.borrow(), vec!["first", "second"]);
    assert!(!has_pending_flush());
}

/// Unmounting stops every effect the owner created; later writes reach
/// none of its hooks.
#[test]
fn owner_teardown_silences_everything() {
    let state = wrap(Object::from_pairs([("k", 0)]));
    let log = Rc::new(RefCell::new(Vec::<&str>::new()));

    let (s, l) = (state.clone(), log.clone());
    let component = Owner::builder()
        .setup(move |_| {
            let l1 = l.clone();
            let s1 = s.clone();
            let _ = watch(
                ripple_core::watch::WatchSource::getter(move || s1.get("k")),
                move |_, _, _| l1.borrow_mut().push("watch"),
                WatchOptions::default(),
            );
            let l2 = l.clone();
            on_updated(move || l2.borrow_mut().push("updated"));
            let l3 = l.clone();
            on_before_unmount(move || l3.borrow_mut().push("before_unmount"));
            let l4 = l.clone();
            on_unmounted(move || l4.borrow_mut().push("unmounted"));
            Ok::<_, ()>(SetupResult::<Value>::Render(Rc::new(move || s.get("k"))))
        })
        .unwrap();
    component.render();
    component.mount();

    component.unmount();
    assert_eq!(*log.borrow(), vec!["before_unmount", "unmounted"]);
    assert_eq!(component.owner().scope().effect_count(), 0);

    log.borrow_mut().clear();
    state.set("k", 1);
    flush();
    assert!(log.borrow().is_empty());
    assert_eq!(Runtime::subscriber_count(state.id(), &DepKey::Prop("k".into())), 0);
}

/// Wrapping is idempotent and unwrapping returns the raw object.
#[test]
fn wrap_identity_round_trips() {
    let raw = Value::Object(Object::new());
    let once = reactive(raw.clone());
    let twice = reactive(once.clone());

    assert_eq!(once, twice);
    assert!(is_reactive(&once));
    assert_eq!(to_raw(&once), raw);
    assert_eq!(to_raw(&raw), raw);
}

/// A readonly view rejects writes without touching the target.
#[test]
fn readonly_views_reject_writes() {
    let raw = Object::from_pairs([("k", 1)]);
    let view = readonly(Value::Object(raw.clone()));
    let view = view.as_reactive().expect("readonly wraps");

    assert!(!view.set("k", 2));
    assert!(matches!(
        view.try_set("k", 2),
        Err(ReactiveError::ReadonlyMutation { .. })
    ));
    assert_eq!(raw.get(&"k".into()), Some(Value::Number(1.0)));
}

/// Stopping a scope stops every effect created in it.
#[test]
fn effect_scope_stops_its_effects() {
    let count = make_ref(0);
    let (runs, bump) = counter();
    let scope = EffectScope::new();

    let c = count.clone();
    scope.run(move || {
        let _ = effect(
            move || {
                c.get();
                bump();
            },
            EffectOptions::default(),
        );
    });
    assert_eq!(scope.effect_count(), 1);

    scope.stop();
    count.set(1);
    assert_eq!(runs.get(), 1);
    assert!(scope.run(|| ()).is_none());
}

/// Errors from a child's watcher reach the parent's error_captured hook and
/// do not stop the flush.
#[test]
fn errors_are_captured_by_ancestors() {
    let captured = Rc::new(RefCell::new(Vec::new()));
    let count = make_ref(0);

    let c = captured.clone();
    let parent = Owner::builder()
        .setup(move |_| {
            on_error_captured(move |err| {
                c.borrow_mut().push(err.to_string());
                false
            });
            Ok::<_, ()>(SetupResult::<()>::Render(Rc::new(|| ())))
        })
        .unwrap();

    let src = count.clone();
    let child = Owner::builder()
        .parent(parent.owner())
        .setup(move |_| {
            let _ = watch(
                &src,
                |n: &i32, _, _| {
                    if *n == 1 {
                        panic!("watcher exploded");
                    }
                },
                WatchOptions::default(),
            );
            Ok::<_, ()>(SetupResult::<()>::Render(Rc::new(|| ())))
        })
        .unwrap();
    child.mount();

    let (after, bump) = counter();
    queue_job(&Job::new(bump));
    count.set(1);
    flush();

    assert_eq!(
        *captured.borrow(),
        vec!["watcher callback panicked: watcher exploded".to_string()]
    );
    assert_eq!(after.get(), 1);
}

/// Uncaptured errors go to the global handler.
#[test]
fn global_handler_receives_uncaptured_errors() {
    log_uncaptured_errors();

    let count = make_ref(0);
    let _handle = watch(
        &count,
        |_, _, _| -> Result<(), String> { Err("sync rejection".into()) },
        WatchOptions::default().flush(FlushTiming::Sync),
    );
    count.set(1);

    assert!(was_uncaptured("watcher callback failed: sync rejection"));
}

/// A callback may hand back a spawned task; its failure is reported once
/// the task completes.
#[tokio::test]
async fn async_callback_failures_reach_the_global_handler() {
    log_uncaptured_errors();
    let expected = "async callback failed: watcher callback: async rejection";

    let count = make_ref(0);
    let _handle = watch(
        &count,
        |_, _, _| tokio::spawn(async { Err::<(), _>("async rejection") }),
        WatchOptions::default().flush(FlushTiming::Sync),
    );
    count.set(1);
    assert!(!was_uncaptured(expected));

    for _ in 0..10 {
        if was_uncaptured(expected) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(was_uncaptured(expected));
}

/// Provided values flow to descendants.
#[test]
fn provide_inject_across_owners() {
    const TOKEN: InjectionKey<String> = InjectionKey::new("token");

    let root = Owner::builder()
        .setup(|_| {
            provide(&TOKEN, "secret".to_string());
            Ok::<_, ()>(SetupResult::<()>::Render(Rc::new(|| ())))
        })
        .unwrap();

    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    let _child = Owner::builder()
        .parent(root.owner())
        .setup(move |_| {
            *s.borrow_mut() = inject(&TOKEN);
            Ok::<_, ()>(SetupResult::<()>::Render(Rc::new(|| ())))
        })
        .unwrap();

    assert_eq!(seen.borrow().as_deref(), Some("secret"));
}

/// `watch_effect` with pre timing runs synchronously during setup and is
/// queued once the owner is mounted.
#[test]
fn pre_watchers_follow_mount_state() {
    let count = make_ref(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (c, s) = (count.clone(), seen.clone());
    let component = Owner::builder()
        .setup(move |_| {
            let (c1, s1) = (c.clone(), s.clone());
            let _ = watch_effect(move |_| s1.borrow_mut().push(c1.get()), WatchOptions::default());
            c.set(1);
            Ok::<_, ()>(SetupResult::<()>::Render(Rc::new(|| ())))
        })
        .unwrap();
    assert_eq!(*seen.borrow(), vec![0, 1]);

    component.mount();
    count.set(2);
    assert_eq!(*seen.borrow(), vec![0, 1]);
    flush();
    assert_eq!(*seen.borrow(), vec![0, 1, 2]);
}

/// On a current-thread runtime the flush happens on its own at the next
/// yield, and `next_tick` resolves after it.
#[tokio::test]
async fn flush_is_spawned_on_the_runtime() {
    let count = make_ref(0);
    let (calls, bump) = counter();
    let _handle = watch(&count, move |_, _, _| bump(), WatchOptions::default());

    count.set(1);
    assert!(has_pending_flush());
    tokio::task::yield_now().await;
    assert_eq!(calls.get(), 1);
    assert!(!has_pending_flush());
}

/// `next_tick` resolves after updates and their `updated` hooks.
#[tokio::test]
async fn next_tick_waits_for_updated_hooks() {
    let count = make_ref(0);
    let log = Rc::new(RefCell::new(Vec::<&str>::new()));

    let (c, l) = (count.clone(), log.clone());
    let on_update = {
        let l = log.clone();
        move || l.borrow_mut().push("update")
    };
    let component = Owner::builder()
        .on_update(on_update)
        .setup(move |_| {
            let l1 = l.clone();
            on_mounted(move || l1.borrow_mut().push("mounted"));
            let l2 = l.clone();
            on_updated(move || l2.borrow_mut().push("updated"));
            Ok::<_, ()>(SetupResult::<i32>::Render(Rc::new(move || c.get())))
        })
        .unwrap();
    component.render();
    component.mount();

    count.set(1);
    next_tick().await;
    assert_eq!(*log.borrow(), vec!["mounted", "update", "updated"]);

    let l = log.clone();
    on_next_tick(move || l.borrow_mut().push("tick"));
    next_tick().await;
    assert_eq!(log.borrow().last(), Some(&"tick"));
}

//! Reactive Runtime
//!
//! The runtime is the dependency tracker that connects reactive values to
//! the effects that read them. It owns the subscription table and decides
//! which effects to notify when a value changes.
//!
//! # How It Works
//!
//! 1. When an effect is created, it registers with the runtime. The registry
//!    holds weak references, so registration never keeps an effect alive.
//!
//! 2. When a reactive value is read inside a running effect, the runtime
//!    records the subscription under `(target, key)` and mirrors it on the
//!    effect's own dependency list.
//!
//! 3. When a reactive value is written, the runtime:
//!    a. Collects the subscribers of every affected key, deduplicated in
//!       subscription order
//!    b. Skips the effect that is currently running, unless it allows
//!       recursion
//!    c. Notifies computed effects first, then everything else
//!
//! 4. Before an effect re-runs, its subscriptions are cleared, so the next
//!    run records exactly what it reads.
//!
//! # Thread Safety
//!
//! The subscription table is thread-local. Reactive values are `!Send`, so a
//! value and every effect that can observe it live on the same thread. No
//! borrow of the table is ever held while user code runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use super::context::ReactiveContext;
use super::effect::{EffectInner, ReactiveEffect};
use super::subscriber::{
    DebuggerEvent, DebuggerEventKind, DepKey, SubscriberId, TargetId, TrackOp, TriggerOp,
};

type KeyMap = HashMap<DepKey, IndexSet<SubscriberId>>;

#[derive(Default)]
struct RuntimeState {
    // Weak so that dropping the last handle to an effect disposes it.
    registry: HashMap<SubscriberId, Weak<EffectInner>>,
    targets: HashMap<TargetId, KeyMap>,
}

impl RuntimeState {
    fn remove_subscription(&mut self, id: SubscriberId, target: TargetId, key: &DepKey) {
        let Some(keys) = self.targets.get_mut(&target) else {
            return;
        };
        if let Some(subscribers) = keys.get_mut(key) {
            subscribers.shift_remove(&id);
            if subscribers.is_empty() {
                keys.remove(key);
            }
        }
        if keys.is_empty() {
            self.targets.remove(&target);
        }
    }
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

/// The reactive runtime for the current thread.
pub struct Runtime;

impl Runtime {
    /// Register an effect with the runtime.
    pub(crate) fn register(effect: &Rc<EffectInner>) {
        RUNTIME.with(|rt| {
            rt.borrow_mut()
                .registry
                .insert(effect.id, Rc::downgrade(effect));
        });
    }

    /// Unregister an effect and drop its subscriptions.
    ///
    /// Called from `Drop`, so it tolerates a torn-down or busy thread-local.
    pub(crate) fn unregister(id: SubscriberId, deps: &[(TargetId, DepKey)]) {
        let _ = RUNTIME.try_with(|rt| {
            if let Ok(mut rt) = rt.try_borrow_mut() {
                rt.registry.remove(&id);
                for (target, key) in deps {
                    rt.remove_subscription(id, *target, key);
                }
            }
        });
    }

    /// Record that the current effect read `key` of `target`.
    ///
    /// Does nothing outside a running effect, while tracking is paused, or
    /// for an effect that has been stopped.
    pub fn track(target: TargetId, op: TrackOp, key: DepKey) {
        let Some(effect) = ReactiveContext::tracking_effect() else {
            return;
        };
        // An effect that stopped itself mid-run records nothing more.
        if !effect.is_active() {
            return;
        }

        let inserted = RUNTIME.with(|rt| {
            rt.borrow_mut()
                .targets
                .entry(target)
                .or_default()
                .entry(key.clone())
                .or_default()
                .insert(effect.id)
        });
        if !inserted {
            return;
        }

        effect.deps.borrow_mut().push((target, key.clone()));
        effect.on_tracked(&DebuggerEvent {
            effect: effect.id,
            target,
            kind: DebuggerEventKind::Track(op),
            key,
        });
    }

    /// Notify every subscriber of the given keys of `target`.
    ///
    /// The first key is reported as the event key to debug hooks.
    pub fn trigger(target: TargetId, op: TriggerOp, keys: &[DepKey]) {
        let Some(primary) = keys.first() else {
            return;
        };

        let effects: Vec<Rc<EffectInner>> = RUNTIME.with(|rt| {
            let rt = rt.borrow();
            let Some(deps) = rt.targets.get(&target) else {
                return Vec::new();
            };

            let mut ids: IndexSet<SubscriberId> = IndexSet::new();
            for key in keys {
                if let Some(subscribers) = deps.get(key) {
                    ids.extend(subscribers.iter().copied());
                }
            }

            ids.iter()
                .filter_map(|id| rt.registry.get(id).and_then(Weak::upgrade))
                .collect()
        });

        if effects.is_empty() {
            return;
        }

        let running = ReactiveContext::current_subscriber();
        let (computed, plain): (Vec<_>, Vec<_>) = effects
            .into_iter()
            .filter(|effect| Some(effect.id) != running || effect.allow_recurse)
            .partition(|effect| effect.computed);

        tracing::trace!(
            target_id = target.raw(),
            key = %primary,
            ?op,
            computed = computed.len(),
            effects = plain.len(),
            "trigger"
        );

        for effect in computed.into_iter().chain(plain) {
            let event = DebuggerEvent {
                effect: effect.id,
                target,
                kind: DebuggerEventKind::Trigger(op),
                key: primary.clone(),
            };
            ReactiveEffect::from_inner(effect).notify(&event);
        }
    }

    /// Remove every subscription an effect holds.
    ///
    /// Called before re-running an effect to clear stale dependencies.
    pub(crate) fn cleanup(effect: &EffectInner) {
        let deps = std::mem::take(&mut *effect.deps.borrow_mut());
        if deps.is_empty() {
            return;
        }
        RUNTIME.with(|rt| {
            let mut rt = rt.borrow_mut();
            for (target, key) in &deps {
                rt.remove_subscription(effect.id, *target, key);
            }
        });
    }

    /// Drop the subscription table of a target that no longer exists.
    pub(crate) fn forget_target(target: TargetId) {
        let _ = RUNTIME.try_with(|rt| {
            if let Ok(mut rt) = rt.try_borrow_mut() {
                rt.targets.remove(&target);
            }
        });
    }

    /// Number of effects subscribed to `key` of `target`.
    pub fn subscriber_count(target: TargetId, key: &DepKey) -> usize {
        RUNTIME.with(|rt| {
            rt.borrow()
                .targets
                .get(&target)
                .and_then(|keys| keys.get(key))
                .map_or(0, IndexSet::len)
        })
    }

    /// Returns true if any effect is subscribed to any key of `target`.
    pub fn has_subscribers(target: TargetId) -> bool {
        RUNTIME.with(|rt| rt.borrow().targets.contains_key(&target))
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if reads would currently be recorded.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_tracking()
    }
}

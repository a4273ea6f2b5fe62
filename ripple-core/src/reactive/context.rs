//! Reactive Context
//!
//! The reactive context tracks which effect is currently running and whether
//! reads should be recorded at all. When a reactive value is read, the
//! tracker asks the context for the current effect and subscribes it.
//!
//! # Implementation
//!
//! We use a thread-local stack of running effects. Entering a context pushes
//! the effect and enables tracking; dropping the guard pops it and restores
//! the previous tracking flag. Nested contexts (a computed read inside an
//! effect) therefore attribute reads to the innermost effect only.
//!
//! Tracking can be paused independently of the stack. Lifecycle hooks and
//! `untracked` blocks pause it so reads inside them never subscribe the
//! surrounding effect.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::effect::EffectInner;
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Rc<EffectInner>>> = const { RefCell::new(Vec::new()) };
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
///
/// This keeps the context stack balanced even if the effect panics.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
}

impl ReactiveContext {
    /// Enter a reactive context for the given effect.
    ///
    /// While this context is active, any reactive value that is read will
    /// register the effect as a dependent.
    pub(crate) fn enter(effect: Rc<EffectInner>) -> Self {
        let subscriber_id = effect.id;
        enable_tracking();
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(effect));
        Self { subscriber_id }
    }

    /// Check if there is an active reactive context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the ID of the innermost running effect, if any.
    ///
    /// This ignores the tracking flag: an effect is still "running" while
    /// tracking is paused.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|effect| effect.id))
    }

    /// Returns true when a read right now would record a subscription.
    pub fn is_tracking() -> bool {
        SHOULD_TRACK.with(Cell::get) && Self::is_active()
    }

    /// The effect that reads should be attributed to.
    pub(crate) fn tracking_effect() -> Option<Rc<EffectInner>> {
        if !SHOULD_TRACK.with(Cell::get) {
            return None;
        }
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Returns true when the effect is anywhere on the stack.
    pub(crate) fn is_running(id: SubscriberId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().any(|effect| effect.id == id))
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(effect) = &popped {
            debug_assert_eq!(
                effect.id, self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id, effect.id
            );
        }
        reset_tracking();

        // Dropped outside the stack borrow: this may be the last handle.
        drop(popped);
    }
}

/// Stop recording reads until the matching [`reset_tracking`].
pub fn pause_tracking() {
    TRACK_STACK.with(|stack| stack.borrow_mut().push(SHOULD_TRACK.with(Cell::get)));
    SHOULD_TRACK.with(|flag| flag.set(false));
}

/// Resume recording reads until the matching [`reset_tracking`].
pub fn enable_tracking() {
    TRACK_STACK.with(|stack| stack.borrow_mut().push(SHOULD_TRACK.with(Cell::get)));
    SHOULD_TRACK.with(|flag| flag.set(true));
}

/// Restore the tracking flag saved by the last pause or enable.
pub fn reset_tracking() {
    let previous = TRACK_STACK.with(|stack| stack.borrow_mut().pop());
    SHOULD_TRACK.with(|flag| flag.set(previous.unwrap_or(true)));
}

/// Run `f` without recording any reads against the current effect.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _pause = TrackingPause::new();
    f()
}

/// Guard form of [`pause_tracking`]; resets on drop.
pub(crate) struct TrackingPause(());

impl TrackingPause {
    pub(crate) fn new() -> Self {
        pause_tracking();
        Self(())
    }
}

impl Drop for TrackingPause {
    fn drop(&mut self) {
        reset_tracking();
    }
}

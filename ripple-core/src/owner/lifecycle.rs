//! Lifecycle Hooks
//!
//! Hooks are registered while an owner's setup is running and stored on
//! that owner in per-phase lists. They run in registration order, with
//! tracking paused and their owner current.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::instance::{current_owner, Owner};
use crate::config::dev_warn;
use crate::error::{CallbackReturn, ErrorSource, ReactiveError};
use crate::reactive::DebuggerEvent;

/// The phases an owner can register hooks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleHook {
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
    RenderTracked,
    RenderTriggered,
    ErrorCaptured,
}

impl LifecycleHook {
    pub const ALL: [LifecycleHook; 9] = [
        LifecycleHook::BeforeMount,
        LifecycleHook::Mounted,
        LifecycleHook::BeforeUpdate,
        LifecycleHook::Updated,
        LifecycleHook::BeforeUnmount,
        LifecycleHook::Unmounted,
        LifecycleHook::RenderTracked,
        LifecycleHook::RenderTriggered,
        LifecycleHook::ErrorCaptured,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleHook::BeforeMount => "before_mount",
            LifecycleHook::Mounted => "mounted",
            LifecycleHook::BeforeUpdate => "before_update",
            LifecycleHook::Updated => "updated",
            LifecycleHook::BeforeUnmount => "before_unmount",
            LifecycleHook::Unmounted => "unmounted",
            LifecycleHook::RenderTracked => "render_tracked",
            LifecycleHook::RenderTriggered => "render_triggered",
            LifecycleHook::ErrorCaptured => "error_captured",
        }
    }
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered hook, by calling convention.
#[derive(Clone)]
pub(crate) enum HookFn {
    /// Lifecycle transitions. Reports its own return value.
    Plain(Rc<dyn Fn(&Owner, ErrorSource)>),

    /// `render_tracked` / `render_triggered`.
    Debugger(Rc<dyn Fn(&DebuggerEvent)>),

    /// `error_captured`. Returning false stops propagation.
    Error(Rc<dyn Fn(&ReactiveError) -> bool>),
}

impl HookFn {
    fn plain<F, R>(hook: F) -> Self
    where
        F: Fn() -> R + 'static,
        R: CallbackReturn,
    {
        HookFn::Plain(Rc::new(move |owner: &Owner, origin: ErrorSource| {
            hook().report(Some(owner), origin)
        }))
    }
}

fn register(kind: LifecycleHook, hook: HookFn) -> bool {
    match current_owner() {
        Some(owner) => {
            owner.add_hook(kind, hook);
            true
        }
        None => {
            dev_warn!("{}", ReactiveError::NoCurrentOwner { hook: kind });
            false
        }
    }
}

macro_rules! plain_hook {
    ($(#[$doc:meta])* $name:ident => $kind:ident) => {
        $(#[$doc])*
        ///
        /// Returns false (with a dev-mode warning) when no owner is current.
        pub fn $name<F, R>(hook: F) -> bool
        where
            F: Fn() -> R + 'static,
            R: CallbackReturn,
        {
            register(LifecycleHook::$kind, HookFn::plain(hook))
        }
    };
}

plain_hook!(
    /// Run `hook` after setup, before the first render.
    on_before_mount => BeforeMount
);
plain_hook!(
    /// Run `hook` once the host reports the first render.
    on_mounted => Mounted
);
plain_hook!(
    /// Run `hook` before each scheduled update.
    on_before_update => BeforeUpdate
);
plain_hook!(
    /// Run `hook` on the tick after each update.
    on_updated => Updated
);
plain_hook!(
    /// Run `hook` before the owner's effects are stopped.
    on_before_unmount => BeforeUnmount
);
plain_hook!(
    /// Run `hook` after the owner's effects are stopped.
    on_unmounted => Unmounted
);

/// Run `hook` for every dependency the render function records.
pub fn on_render_tracked(hook: impl Fn(&DebuggerEvent) + 'static) -> bool {
    register(LifecycleHook::RenderTracked, HookFn::Debugger(Rc::new(hook)))
}

/// Run `hook` for every change that schedules a re-render.
pub fn on_render_triggered(hook: impl Fn(&DebuggerEvent) + 'static) -> bool {
    register(LifecycleHook::RenderTriggered, HookFn::Debugger(Rc::new(hook)))
}

/// Receive errors raised by descendant owners.
///
/// Return false to stop the error from reaching further ancestors and the
/// global handler.
pub fn on_error_captured(hook: impl Fn(&ReactiveError) -> bool + 'static) -> bool {
    register(LifecycleHook::ErrorCaptured, HookFn::Error(Rc::new(hook)))
}

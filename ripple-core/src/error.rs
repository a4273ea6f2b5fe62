//! Error Handling
//!
//! Reactions run long after the code that set them up has returned, so a
//! failing watcher, hook or scheduled job cannot simply propagate its error.
//! Every user callback invoked by the runtime goes through
//! [`call_with_error_handling`], which contains panics and hands the failure
//! to [`handle_error`].
//!
//! # Propagation
//!
//! 1. Starting at the parent of the owner the callback belongs to, every
//!    `on_error_captured` hook is offered the error. A hook returning `false`
//!    stops propagation.
//! 2. If nothing stopped it, the global handler (if installed) receives it.
//! 3. Otherwise it is logged with `tracing::error!`.
//!
//! Errors raised while constructing something (an effect's first run, an
//! owner's setup) are not routed here; they propagate to the caller.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::config;
use crate::owner::{current_owner, LifecycleHook, Owner};

/// Errors produced by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// A user callback panicked.
    #[error("{origin} panicked: {message}")]
    Panicked { origin: ErrorSource, message: String },

    /// A user callback returned an error.
    #[error("{origin} failed: {message}")]
    Failed { origin: ErrorSource, message: String },

    /// Write attempted through a readonly container.
    #[error("set operation on key \"{key}\" failed: target is readonly")]
    ReadonlyMutation { key: String },

    /// A lifecycle hook was registered with no owner running setup.
    #[error("{hook} hook can only be registered during an owner's setup")]
    NoCurrentOwner { hook: LifecycleHook },

    /// A job re-queued itself too many times in a single flush.
    #[error("maximum recursive updates exceeded: job {job} ran more than {limit} times in one flush")]
    RecursionLimit { job: u64, limit: usize },

    /// `EffectScope::run` was called on a stopped scope.
    #[error("cannot run an inactive effect scope")]
    InactiveScope,

    /// Arrays only take numeric keys.
    #[error("key \"{key}\" is not a valid array index")]
    InvalidKey { key: String },

    /// Only objects and arrays can be wrapped in a container.
    #[error("value cannot be made reactive: {value}")]
    NotAnObject { value: String },
}

impl ReactiveError {
    /// Where the error was raised, if it came from a user callback.
    pub fn origin(&self) -> Option<ErrorSource> {
        match self {
            ReactiveError::Panicked { origin, .. } | ReactiveError::Failed { origin, .. } => {
                Some(*origin)
            }
            _ => None,
        }
    }
}

/// The runtime call site a user callback was invoked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    EffectRun,
    Scheduler,
    DebugHook,
    FlushJob,
    PreFlushJob,
    PostFlushJob,
    NextTick,
    WatchGetter,
    WatchCallback,
    WatchCleanup,
    ScopeDispose,
    LifecycleHook(LifecycleHook),
    ComponentUpdate,
    AsyncCallback,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::EffectRun => f.write_str("effect"),
            ErrorSource::Scheduler => f.write_str("effect scheduler"),
            ErrorSource::DebugHook => f.write_str("debugger hook"),
            ErrorSource::FlushJob => f.write_str("scheduler flush job"),
            ErrorSource::PreFlushJob => f.write_str("pre-flush job"),
            ErrorSource::PostFlushJob => f.write_str("post-flush job"),
            ErrorSource::NextTick => f.write_str("next tick callback"),
            ErrorSource::WatchGetter => f.write_str("watcher getter"),
            ErrorSource::WatchCallback => f.write_str("watcher callback"),
            ErrorSource::WatchCleanup => f.write_str("watcher cleanup function"),
            ErrorSource::ScopeDispose => f.write_str("scope dispose callback"),
            ErrorSource::LifecycleHook(hook) => write!(f, "{hook} hook"),
            ErrorSource::ComponentUpdate => f.write_str("component update callback"),
            ErrorSource::AsyncCallback => f.write_str("async callback"),
        }
    }
}

type ErrorHandler = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

static GLOBAL_HANDLER: OnceLock<RwLock<Option<ErrorHandler>>> = OnceLock::new();

fn global_handler() -> &'static RwLock<Option<ErrorHandler>> {
    GLOBAL_HANDLER.get_or_init(|| RwLock::new(None))
}

/// Install a process-wide handler for errors nobody captured.
pub fn set_global_error_handler(handler: impl Fn(&ReactiveError) + Send + Sync + 'static) {
    *global_handler().write() = Some(Arc::new(handler));
}

/// Remove the process-wide handler; uncaptured errors are logged again.
pub fn clear_global_error_handler() {
    *global_handler().write() = None;
}

/// Report an error raised by a reaction.
pub fn handle_error(err: ReactiveError, owner: Option<&Owner>) {
    let mut cursor = owner.and_then(Owner::parent);
    while let Some(ancestor) = cursor {
        if !ancestor.capture_error(&err) {
            return;
        }
        cursor = ancestor.parent();
    }

    // Clone out so the lock is not held while the handler runs.
    let handler = global_handler().read().clone();
    if let Some(handler) = handler {
        handler(&err);
        return;
    }

    if config::current().log_unhandled_errors {
        tracing::error!(error = %err, origin = ?err.origin(), "unhandled error in reactive callback");
    }
}

/// Run `f`, containing a panic and reporting it against the current owner.
///
/// Returns `None` when `f` panicked.
pub fn call_with_error_handling<R>(origin: ErrorSource, f: impl FnOnce() -> R) -> Option<R> {
    let owner = current_owner();
    call_with_error_handling_in(owner.as_ref(), origin, f)
}

/// Like [`call_with_error_handling`] with an explicit owner.
pub fn call_with_error_handling_in<R>(
    owner: Option<&Owner>,
    origin: ErrorSource,
    f: impl FnOnce() -> R,
) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            handle_error(ReactiveError::Panicked { origin, message }, owner);
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// What a user callback may return.
///
/// `()` never fails. A `Result` reports its error. A tokio `JoinHandle`
/// is awaited on the current tokio runtime and reports its error or join
/// failure when it completes.
pub trait CallbackReturn {
    fn report(self, owner: Option<&Owner>, origin: ErrorSource);
}

impl CallbackReturn for () {
    fn report(self, _owner: Option<&Owner>, _origin: ErrorSource) {}
}

impl<E: fmt::Display> CallbackReturn for Result<(), E> {
    fn report(self, owner: Option<&Owner>, origin: ErrorSource) {
        if let Err(err) = self {
            handle_error(
                ReactiveError::Failed {
                    origin,
                    message: err.to_string(),
                },
                owner,
            );
        }
    }
}

impl<E> CallbackReturn for tokio::task::JoinHandle<Result<(), E>>
where
    E: fmt::Display + Send + 'static,
{
    fn report(self, _owner: Option<&Owner>, origin: ErrorSource) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%origin, "async callback returned outside a tokio runtime; its outcome is not observed");
            return;
        };
        handle.spawn(async move {
            let message = match self.await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err.to_string(),
                Err(join) => join.to_string(),
            };
            handle_error(
                ReactiveError::Failed {
                    origin: ErrorSource::AsyncCallback,
                    message: format!("{origin}: {message}"),
                },
                None,
            );
        });
    }
}

//! Owner Instances
//!
//! An owner is one component-like unit: its props, the effect scope that
//! holds every effect created during its setup, its lifecycle hooks and its
//! place in the owner tree.
//!
//! # States
//!
//! ```text
//!   Initializing ──mount()──► Mounted ◄──► Updating
//!        │                       │
//!        └──────unmount()────────┴──────► Unmounted
//! ```
//!
//! `Unmounted` is terminal. Unmounting runs `before_unmount`, stops the
//! scope, runs `unmounted` and clears every hook list.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::inject::Provides;
use super::lifecycle::{HookFn, LifecycleHook};
use crate::error::{call_with_error_handling_in, panic_message, ErrorSource, ReactiveError};
use crate::reactive::{
    untracked, DebuggerEvent, EffectOptions, EffectScope, Object, Reactive, ReactiveEffect,
    TrackingPause, Value,
};
use crate::scheduler::{on_next_tick, queue_job, Job};
use crate::watch::{watch, WatchOptions, WatchSource};

thread_local! {
    static OWNER_STACK: RefCell<Vec<Owner>> = const { RefCell::new(Vec::new()) };
}

/// Unique identifier for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OwnerId(u64);

impl OwnerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Where an owner is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerState {
    Initializing,
    Mounted,
    Updating,
    Unmounted,
}

struct OwnerInner {
    id: OwnerId,
    scope: EffectScope,
    props: Reactive,
    parent: Option<Owner>,
    provides: RefCell<Rc<Provides>>,
    hooks: RefCell<[Vec<HookFn>; 9]>,
    state: Cell<OwnerState>,
    tearing_down: Cell<bool>,
    on_update: Option<Rc<dyn Fn()>>,
    update: OnceCell<Job>,
}

/// A component-like unit that owns effects and hooks.
#[derive(Clone)]
pub struct Owner {
    inner: Rc<OwnerInner>,
}

/// Non-owning handle to an owner.
#[derive(Clone)]
pub struct WeakOwner(Weak<OwnerInner>);

impl WeakOwner {
    pub fn upgrade(&self) -> Option<Owner> {
        self.0.upgrade().map(|inner| Owner { inner })
    }
}

/// Makes an owner current until dropped.
pub(crate) struct OwnerGuard(());

impl OwnerGuard {
    pub(crate) fn enter(owner: &Owner) -> Self {
        OWNER_STACK.with(|stack| stack.borrow_mut().push(owner.clone()));
        OwnerGuard(())
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        let popped = OWNER_STACK.with(|stack| stack.borrow_mut().pop());
        drop(popped);
    }
}

/// The owner whose setup or hook is running.
pub fn current_owner() -> Option<Owner> {
    OWNER_STACK.with(|stack| stack.borrow().last().cloned())
}

impl Owner {
    pub fn builder() -> OwnerBuilder {
        OwnerBuilder::default()
    }

    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    pub fn state(&self) -> OwnerState {
        self.inner.state.get()
    }

    /// True once mounted, including while an update runs.
    pub fn is_mounted(&self) -> bool {
        matches!(self.state(), OwnerState::Mounted | OwnerState::Updating)
    }

    pub fn is_unmounted(&self) -> bool {
        self.state() == OwnerState::Unmounted
    }

    /// The writable props container. Setup sees a readonly view of it.
    pub fn props(&self) -> &Reactive {
        &self.inner.props
    }

    pub fn parent(&self) -> Option<Owner> {
        self.inner.parent.clone()
    }

    /// The scope holding every effect created during setup.
    pub fn scope(&self) -> &EffectScope {
        &self.inner.scope
    }

    pub fn hook_count(&self, kind: LifecycleHook) -> usize {
        self.inner.hooks.borrow()[kind.index()].len()
    }

    pub fn downgrade(&self) -> WeakOwner {
        WeakOwner(Rc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &Owner) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn provides(&self) -> Rc<Provides> {
        Rc::clone(&self.inner.provides.borrow())
    }

    /// The provides layer to write into, creating one if this owner still
    /// shares its parent's.
    pub(crate) fn own_provides(&self) -> Rc<Provides> {
        let parent = self.inner.parent.as_ref().map(Owner::provides);
        let mut provides = self.inner.provides.borrow_mut();
        if let Some(parent) = parent {
            if Rc::ptr_eq(&provides, &parent) {
                *provides = Rc::new(Provides::layer(parent));
            }
        }
        Rc::clone(&provides)
    }

    pub(crate) fn add_hook(&self, kind: LifecycleHook, hook: HookFn) {
        self.inner.hooks.borrow_mut()[kind.index()].push(hook);
    }

    fn clear_hooks(&self) {
        let hooks = std::mem::take(&mut *self.inner.hooks.borrow_mut());
        drop(hooks);
    }

    /// Run every hook registered for `kind`.
    pub(crate) fn invoke_hooks(&self, kind: LifecycleHook, event: Option<&DebuggerEvent>) {
        if self.is_unmounted() {
            return;
        }
        let hooks = self.inner.hooks.borrow()[kind.index()].clone();
        if hooks.is_empty() {
            return;
        }

        let _pause = TrackingPause::new();
        let _guard = OwnerGuard::enter(self);
        let origin = ErrorSource::LifecycleHook(kind);
        for hook in hooks {
            match hook {
                HookFn::Plain(f) => {
                    call_with_error_handling_in(Some(self), origin, || f(self, origin));
                }
                HookFn::Debugger(f) => {
                    if let Some(event) = event {
                        call_with_error_handling_in(Some(self), origin, || f(event));
                    }
                }
                HookFn::Error(_) => {}
            }
        }
    }

    /// Offer an error to this owner's `error_captured` hooks.
    ///
    /// Returns false if a hook stopped propagation.
    pub(crate) fn capture_error(&self, err: &ReactiveError) -> bool {
        let hooks = self.inner.hooks.borrow()[LifecycleHook::ErrorCaptured.index()].clone();
        let _pause = TrackingPause::new();

        let mut propagate = true;
        for hook in hooks {
            let HookFn::Error(f) = hook else { continue };
            match panic::catch_unwind(AssertUnwindSafe(|| f(err))) {
                Ok(keep_going) => propagate &= keep_going,
                Err(payload) => tracing::error!(
                    owner = self.id().raw(),
                    error = %err,
                    panic = %panic_message(payload.as_ref()),
                    "error_captured hook panicked"
                ),
            }
            if !propagate {
                break;
            }
        }
        propagate
    }

    /// Tear the owner down. Idempotent.
    pub fn unmount(&self) {
        if self.is_unmounted() || self.inner.tearing_down.replace(true) {
            return;
        }
        tracing::debug!(owner = self.id().raw(), "unmounting owner");

        self.invoke_hooks(LifecycleHook::BeforeUnmount, None);
        self.inner.scope.stop();
        self.invoke_hooks(LifecycleHook::Unmounted, None);
        self.clear_hooks();
        self.inner.state.set(OwnerState::Unmounted);
    }

    fn abort_setup(&self) {
        tracing::debug!(owner = self.id().raw(), "setup failed, discarding owner");
        self.inner.scope.stop();
        self.clear_hooks();
        self.inner.state.set(OwnerState::Unmounted);
    }

    /// Replace the props: set every key of `next`, delete keys it lacks.
    pub fn update_props(&self, next: &Object) {
        if self.is_unmounted() {
            return;
        }
        let props = &self.inner.props;
        for (key, value) in next.entries() {
            props.set(key, value);
        }
        for key in untracked(|| props.keys()) {
            if !next.contains_key(&key) {
                props.delete(key);
            }
        }
    }

    fn run_update(&self) {
        if self.is_unmounted() {
            return;
        }
        let previous = self.state();
        if previous == OwnerState::Mounted {
            self.inner.state.set(OwnerState::Updating);
        }

        self.invoke_hooks(LifecycleHook::BeforeUpdate, None);
        if let Some(on_update) = self.inner.on_update.clone() {
            call_with_error_handling_in(Some(self), ErrorSource::ComponentUpdate, || on_update());
        }

        if self.state() == OwnerState::Updating {
            self.inner.state.set(previous);
        }

        let owner = self.downgrade();
        on_next_tick(move || {
            if let Some(owner) = owner.upgrade() {
                owner.invoke_hooks(LifecycleHook::Updated, None);
            }
        });
    }

    fn update_job(&self) -> Option<Job> {
        self.inner.update.get().cloned()
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("parent", &self.inner.parent.as_ref().map(Owner::id))
            .field("effects", &self.inner.scope.effect_count())
            .finish()
    }
}

/// What setup hands back to the host.
pub enum SetupResult<T> {
    /// A render function. Its reads are tracked; a change schedules an
    /// update of the owner.
    Render(Rc<dyn Fn() -> T>),

    /// Plain state. It is watched deeply; a change schedules an update.
    State(Value),
}

/// Builds and sets up an owner.
#[derive(Default)]
pub struct OwnerBuilder {
    props: Option<Object>,
    parent: Option<Owner>,
    on_update: Option<Rc<dyn Fn()>>,
}

impl OwnerBuilder {
    /// Initial props. The object is copied; later changes go through
    /// [`Component::update_props`].
    pub fn props(mut self, props: &Object) -> Self {
        self.props = Some(props.clone());
        self
    }

    pub fn parent(mut self, parent: &Owner) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// The host's "please re-render me" callback, called from the update job.
    pub fn on_update(mut self, f: impl Fn() + 'static) -> Self {
        self.on_update = Some(Rc::new(f));
        self
    }

    /// Run `setup` with this owner current and its scope collecting effects.
    ///
    /// If `setup` fails or panics, every effect it created is stopped, its
    /// hooks are dropped, and the error (or panic) reaches the caller.
    pub fn setup<T, E, F>(self, setup: F) -> Result<Component<T>, E>
    where
        T: 'static,
        F: FnOnce(&Reactive) -> Result<SetupResult<T>, E>,
    {
        let raw_props = self
            .props
            .as_ref()
            .map(Object::shallow_clone)
            .unwrap_or_default();
        let props = Reactive::new(&raw_props);
        let readonly_props = Reactive::readonly(&raw_props);

        let provides = match &self.parent {
            Some(parent) => parent.provides(),
            None => Rc::new(Provides::root()),
        };

        let owner = Owner {
            inner: Rc::new(OwnerInner {
                id: OwnerId::new(),
                scope: EffectScope::detached(),
                props,
                parent: self.parent,
                provides: RefCell::new(provides),
                hooks: RefCell::new(Default::default()),
                state: Cell::new(OwnerState::Initializing),
                tearing_down: Cell::new(false),
                on_update: self.on_update,
                update: OnceCell::new(),
            }),
        };
        tracing::debug!(
            owner = owner.id().raw(),
            parent = ?owner.inner.parent.as_ref().map(|p| p.id().raw()),
            "setting up owner"
        );

        let outcome = {
            let _scope = owner.inner.scope.enter();
            let _guard = OwnerGuard::enter(&owner);
            panic::catch_unwind(AssertUnwindSafe(|| setup(&readonly_props)))
        };
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                owner.abort_setup();
                return Err(err);
            }
            Err(payload) => {
                owner.abort_setup();
                panic::resume_unwind(payload);
            }
        };

        let weak = owner.downgrade();
        let update = Job::new(move || {
            if let Some(owner) = weak.upgrade() {
                owner.run_update();
            }
        });
        let _ = owner.inner.update.set(update.clone());

        let rendered = match result {
            SetupResult::Render(render) => {
                let output: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
                let out = output.clone();
                let (tracked, triggered) = (owner.downgrade(), owner.downgrade());
                let effect = ReactiveEffect::new(
                    move || {
                        let value = render();
                        *out.borrow_mut() = Some(value);
                    },
                    EffectOptions::default()
                        .lazy()
                        .scope(&owner.inner.scope)
                        .scheduler(move |_| queue_job(&update))
                        .on_track(move |event| {
                            if let Some(owner) = tracked.upgrade() {
                                owner.invoke_hooks(LifecycleHook::RenderTracked, Some(event));
                            }
                        })
                        .on_trigger(move |event| {
                            if let Some(owner) = triggered.upgrade() {
                                owner.invoke_hooks(LifecycleHook::RenderTriggered, Some(event));
                            }
                        }),
                );
                Rendered::Render { effect, output }
            }
            SetupResult::State(state) => {
                let _scope = owner.inner.scope.enter();
                let _guard = OwnerGuard::enter(&owner);
                let (tracked, triggered) = (owner.downgrade(), owner.downgrade());
                let watched = state.clone();
                let _ = watch(
                    WatchSource::deep(move || watched.clone()),
                    move |_, _, _| queue_job(&update),
                    WatchOptions::default()
                        .on_track(move |event| {
                            if let Some(owner) = tracked.upgrade() {
                                owner.invoke_hooks(LifecycleHook::RenderTracked, Some(event));
                            }
                        })
                        .on_trigger(move |event| {
                            if let Some(owner) = triggered.upgrade() {
                                owner.invoke_hooks(LifecycleHook::RenderTriggered, Some(event));
                            }
                        }),
                );
                Rendered::State(state)
            }
        };

        owner.invoke_hooks(LifecycleHook::BeforeMount, None);
        Ok(Component { owner, rendered })
    }
}

enum Rendered<T> {
    Render {
        effect: ReactiveEffect,
        output: Rc<RefCell<Option<T>>>,
    },
    State(Value),
}

/// A set-up owner, as seen by the host.
pub struct Component<T: 'static> {
    owner: Owner,
    rendered: Rendered<T>,
}

impl<T: 'static> Component<T> {
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Run the render function, re-recording its dependencies.
    ///
    /// Returns `None` for state components and after unmount.
    pub fn render(&self) -> Option<T> {
        let Rendered::Render { effect, output } = &self.rendered else {
            return None;
        };
        if self.owner.is_unmounted() {
            return None;
        }
        let _scope = self.owner.inner.scope.enter();
        effect.run();
        output.borrow_mut().take()
    }

    /// The state returned by setup, for state components.
    pub fn state(&self) -> Option<&Value> {
        match &self.rendered {
            Rendered::State(state) => Some(state),
            Rendered::Render { .. } => None,
        }
    }

    /// Signal the first successful render: fires the `mounted` hooks.
    pub fn mount(&self) {
        if self.owner.state() != OwnerState::Initializing {
            return;
        }
        tracing::debug!(owner = self.owner.id().raw(), "owner mounted");
        self.owner.inner.state.set(OwnerState::Mounted);
        self.owner.invoke_hooks(LifecycleHook::Mounted, None);
    }

    pub fn unmount(&self) {
        self.owner.unmount();
    }

    pub fn update_props(&self, props: &Object) {
        self.owner.update_props(props);
    }

    /// Queue this owner's update job, as a change to its render inputs would.
    pub fn request_update(&self) {
        if let Some(job) = self.owner.update_job() {
            queue_job(&job);
        }
    }
}

impl<T: 'static> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.rendered {
            Rendered::Render { .. } => "render",
            Rendered::State(_) => "state",
        };
        f.debug_struct("Component")
            .field("owner", &self.owner)
            .field("kind", &kind)
            .finish()
    }
}

//! Owners
//!
//! An owner ties a set of effects to a component-like unit so they can be
//! torn down together, and carries what descendants inherit: provided
//! values and error capture.
//!
//! # Setup
//!
//! ```rust,ignore
//! let component = Owner::builder()
//!     .props(&Object::from_pairs([("label", "hi")]))
//!     .on_update(|| host.request_render())
//!     .setup(|props| {
//!         on_mounted(|| println!("mounted"));
//!         let props = props.clone();
//!         Ok::<_, Infallible>(SetupResult::Render(Rc::new(move || props.get("label"))))
//!     })?;
//!
//! let first = component.render();
//! component.mount();
//! // ... later
//! component.unmount();
//! ```
//!
//! While setup runs the owner is current: hook registrars and `provide` /
//! `inject` find it, and every effect created lands in its scope. A change
//! to anything the render function read queues the owner's update job;
//! repeated changes before the next flush produce one update.

mod inject;
mod instance;
mod lifecycle;

pub use inject::{inject, inject_or, inject_or_else, provide, InjectionKey};
pub use instance::{
    current_owner, Component, Owner, OwnerBuilder, OwnerId, OwnerState, SetupResult, WeakOwner,
};
pub use lifecycle::{
    on_before_mount, on_before_unmount, on_before_update, on_error_captured, on_mounted,
    on_render_tracked, on_render_triggered, on_unmounted, on_updated, LifecycleHook,
};

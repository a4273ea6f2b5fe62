//! Subscriber types for the reactive system.
//!
//! A subscriber is an effect that depends on reactive values. A target is
//! anything an effect can depend on: a container, a ref or a computed.
//! Subscriptions are recorded per `(target, key)` pair.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Unique identifier for a subscriber.
///
/// Each effect gets a unique ID when created. The dependency tracker stores
/// IDs rather than the effects themselves so a subscription never keeps an
/// effect alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for something that can be depended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

/// The key a subscription is recorded under.
///
/// `Prop` and `Index` are user keys. The rest are synthetic: `Length` for
/// array length (it doubles as the array iteration key), `Iterate` for
/// enumeration of a plain object, `Value` for the single slot of a ref or
/// computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepKey {
    Prop(Rc<str>),
    Index(usize),
    Length,
    Iterate,
    Value,
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepKey::Prop(name) => write!(f, "{name}"),
            DepKey::Index(index) => write!(f, "[{index}]"),
            DepKey::Length => f.write_str("<length>"),
            DepKey::Iterate => f.write_str("<iterate>"),
            DepKey::Value => f.write_str("<value>"),
        }
    }
}

/// The kind of read that recorded a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// The kind of write that notified subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "op", rename_all = "lowercase")]
pub enum DebuggerEventKind {
    Track(TrackOp),
    Trigger(TriggerOp),
}

/// Passed to `on_track` / `on_trigger` debug callbacks and to the
/// render-tracked / render-triggered lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebuggerEvent {
    pub effect: SubscriberId,
    pub target: TargetId,
    pub kind: DebuggerEventKind,
    pub key: DepKey,
}

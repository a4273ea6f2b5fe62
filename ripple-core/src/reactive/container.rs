//! Reactive Containers
//!
//! A [`Reactive`] is a tracked view of a raw [`Object`]. Every read records
//! a subscription for the running effect; every write that changes
//! something notifies the subscribers of the affected keys.
//!
//! # Identity
//!
//! Each raw object has at most one view per mode (reactive, readonly,
//! shallow reactive, shallow readonly). Thread-local identity maps hold weak
//! references to the live views, so wrapping the same object twice returns
//! the same handle, and a view is freed once nothing uses it.
//!
//! # Deep and Shallow
//!
//! Deep views wrap nested objects on read (with the same readonly flag) and
//! unwrap refs stored in plain objects. Writes store raw values. Shallow views
//! hand back exactly what is stored.
//!
//! # Synthetic Keys
//!
//! Adding or deleting a property of a plain object also notifies
//! `DepKey::Iterate`, so effects that enumerated the object re-run. Arrays use
//! `DepKey::Length` for the same purpose.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::{smallvec, SmallVec};

use super::runtime::Runtime;
use super::subscriber::{DepKey, TargetId, TrackOp, TriggerOp};
use super::value::{Key, Object, ReactiveValue, Seen, Value};
use crate::config::dev_warn;
use crate::error::ReactiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProxyMode {
    readonly: bool,
    shallow: bool,
    /// A readonly view taken of a reactive view rather than of a raw object.
    of_reactive: bool,
}

impl ProxyMode {
    const REACTIVE: Self = Self {
        readonly: false,
        shallow: false,
        of_reactive: false,
    };
    const READONLY: Self = Self {
        readonly: true,
        shallow: false,
        of_reactive: false,
    };
    const SHALLOW_REACTIVE: Self = Self {
        readonly: false,
        shallow: true,
        of_reactive: false,
    };
    const SHALLOW_READONLY: Self = Self {
        readonly: true,
        shallow: true,
        of_reactive: false,
    };

    fn index(self) -> usize {
        (self.of_reactive as usize) << 2 | (self.readonly as usize) << 1 | self.shallow as usize
    }

    fn over_reactive(self) -> Self {
        Self {
            of_reactive: true,
            ..self
        }
    }
}

#[derive(Default)]
struct ProxyMaps {
    maps: [HashMap<TargetId, Weak<ProxyInner>>; 8],
}

thread_local! {
    static PROXIES: RefCell<ProxyMaps> = RefCell::new(ProxyMaps::default());
}

struct ProxyInner {
    target: Object,
    mode: ProxyMode,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        let id = self.target.id();
        let index = self.mode.index();
        let _ = PROXIES.try_with(|proxies| {
            if let Ok(mut proxies) = proxies.try_borrow_mut() {
                let map = &mut proxies.maps[index];
                if map.get(&id).is_some_and(|weak| weak.strong_count() == 0) {
                    map.remove(&id);
                }
            }
        });
    }
}

/// A tracked view of a raw object or array.
#[derive(Clone)]
pub struct Reactive {
    inner: Rc<ProxyInner>,
}

impl Reactive {
    fn create(target: &Object, mode: ProxyMode) -> Self {
        PROXIES.with(|proxies| {
            let mut proxies = proxies.borrow_mut();
            let map = &mut proxies.maps[mode.index()];
            if let Some(existing) = map.get(&target.id()).and_then(Weak::upgrade) {
                return Self { inner: existing };
            }
            let inner = Rc::new(ProxyInner {
                target: target.clone(),
                mode,
            });
            map.insert(target.id(), Rc::downgrade(&inner));
            Self { inner }
        })
    }

    /// The deep, writable view of `target`.
    pub fn new(target: &Object) -> Self {
        Self::create(target, ProxyMode::REACTIVE)
    }

    /// The deep, readonly view of `target`.
    pub fn readonly(target: &Object) -> Self {
        Self::create(target, ProxyMode::READONLY)
    }

    /// The writable view that tracks only the top level of `target`.
    pub fn shallow(target: &Object) -> Self {
        Self::create(target, ProxyMode::SHALLOW_REACTIVE)
    }

    pub fn shallow_readonly(target: &Object) -> Self {
        Self::create(target, ProxyMode::SHALLOW_READONLY)
    }

    /// The raw object behind this view.
    pub fn target(&self) -> &Object {
        &self.inner.target
    }

    pub fn id(&self) -> TargetId {
        self.inner.target.id()
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.mode.readonly
    }

    /// True for writable views and for readonly views of writable views.
    pub fn is_reactive(&self) -> bool {
        !self.inner.mode.readonly || self.inner.mode.of_reactive
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.mode.shallow
    }

    pub fn is_array(&self) -> bool {
        self.inner.target.is_array()
    }

    fn resolve(&self, key: impl Into<Key>) -> Key {
        let key = key.into();
        self.inner.target.normalize(&key).unwrap_or(key)
    }

    /// The dependency key that stands for "the set of keys".
    fn iteration_key(&self) -> DepKey {
        if self.is_array() {
            DepKey::Length
        } else {
            DepKey::Iterate
        }
    }

    /// Read a key, tracking it.
    ///
    /// Missing keys read as `Undefined` and are still tracked, so adding
    /// them later re-runs the reader.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = self.resolve(key);
        let target = &self.inner.target;
        Runtime::track(target.id(), TrackOp::Get, key.dep());

        let value = target.get(&key).unwrap_or_default();
        if self.inner.mode.shallow {
            return value;
        }
        self.wrap_nested(value)
    }

    fn wrap_nested(&self, value: Value) -> Value {
        let mode = self.inner.mode;
        match value {
            Value::Ref(r) if !self.is_array() => r.get(),
            Value::Object(o) if !o.is_marked_raw() => Value::Reactive(if mode.readonly {
                Reactive::create(&o, ProxyMode { shallow: false, ..mode })
            } else {
                Reactive::new(&o)
            }),
            Value::Reactive(r) if mode.readonly && !r.is_readonly() => {
                Value::Reactive(Reactive::create(r.target(), ProxyMode::READONLY.over_reactive()))
            }
            other => other,
        }
    }

    /// Write a key. Returns true if anything changed.
    ///
    /// Writing through a readonly view changes nothing and emits a dev-mode
    /// warning.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        match self.try_set(key, value) {
            Ok(changed) => changed,
            Err(err) => {
                dev_warn!(target_id = self.id().raw(), "{err}");
                false
            }
        }
    }

    /// Like [`Reactive::set`], but reports rejected writes as errors.
    pub fn try_set(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Result<bool, ReactiveError> {
        let key = self.resolve(key);
        if self.inner.mode.readonly {
            return Err(ReactiveError::ReadonlyMutation {
                key: key.to_string(),
            });
        }
        self.write(key, value.into())
    }

    fn write(&self, key: Key, value: Value) -> Result<bool, ReactiveError> {
        let target = &self.inner.target;
        let shallow = self.inner.mode.shallow;
        let value = if shallow { value } else { value.to_raw() };
        let old = target.get(&key);

        if !shallow && !target.is_array() {
            if let Some(Value::Ref(old_ref)) = &old {
                if !matches!(value, Value::Ref(_)) {
                    return Ok(old_ref.set(value));
                }
            }
        }

        let had_key = target.contains_key(&key);
        target.insert(&key, value.clone())?;

        if !had_key {
            let keys: SmallVec<[DepKey; 2]> = smallvec![key.dep(), self.iteration_key()];
            Runtime::trigger(target.id(), TriggerOp::Add, &keys);
            return Ok(true);
        }

        let changed = old.map_or(true, |old| value.has_changed(&old));
        if changed {
            Runtime::trigger(target.id(), TriggerOp::Set, &[key.dep()]);
        }
        Ok(changed)
    }

    /// Delete a key. Returns true if it existed.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        let key = self.resolve(key);
        if self.inner.mode.readonly {
            dev_warn!(
                target_id = self.id().raw(),
                "delete operation on key \"{key}\" failed: target is readonly"
            );
            return false;
        }

        let target = &self.inner.target;
        if !target.contains_key(&key) {
            return false;
        }
        target.remove(&key);

        let mut keys: SmallVec<[DepKey; 2]> = smallvec![key.dep()];
        if !target.is_array() {
            keys.push(DepKey::Iterate);
        }
        Runtime::trigger(target.id(), TriggerOp::Delete, &keys);
        true
    }

    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = self.resolve(key);
        Runtime::track(self.id(), TrackOp::Has, key.dep());
        self.inner.target.contains_key(&key)
    }

    /// The current keys, tracking the key set.
    pub fn keys(&self) -> Vec<Key> {
        Runtime::track(self.id(), TrackOp::Iterate, self.iteration_key());
        self.inner.target.keys()
    }

    /// The current values, tracking the key set and every key read.
    pub fn values(&self) -> Vec<Value> {
        self.keys().into_iter().map(|key| self.get(key)).collect()
    }

    pub fn len(&self) -> usize {
        Runtime::track(self.id(), TrackOp::Iterate, self.iteration_key());
        self.inner.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append to an array. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let index = self.inner.target.len();
        self.set(Key::Index(index), value);
        self.inner.target.len()
    }

    /// Remove the last element of an array.
    pub fn pop(&self) -> Option<Value> {
        if self.inner.mode.readonly {
            dev_warn!(target_id = self.id().raw(), "pop on a readonly array ignored");
            return None;
        }
        let len = self.inner.target.len();
        if !self.is_array() || len == 0 {
            return None;
        }
        let removed = self.inner.target.truncate_or_extend(len - 1);
        Runtime::trigger(
            self.id(),
            TriggerOp::Delete,
            &[DepKey::Index(len - 1), DepKey::Length],
        );
        removed.into_iter().next()
    }

    /// Resize an array, notifying the removed indices and the length.
    pub fn set_len(&self, len: usize) {
        if self.inner.mode.readonly {
            dev_warn!(target_id = self.id().raw(), "length change on a readonly array ignored");
            return;
        }
        let old_len = self.inner.target.len();
        if !self.is_array() || old_len == len {
            return;
        }
        self.inner.target.truncate_or_extend(len);

        let mut keys: Vec<DepKey> = vec![DepKey::Length];
        keys.extend((len..old_len).map(DepKey::Index));
        let op = if len < old_len {
            TriggerOp::Delete
        } else {
            TriggerOp::Add
        };
        Runtime::trigger(self.id(), op, &keys);
    }

    /// An untracked deep snapshot of the target.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.inner.target.clone()).to_json()
    }

    /// Read every key (and every nested value for deep views) so the
    /// current effect tracks the whole reachable graph.
    pub(crate) fn traverse_tracked(&self, seen: &mut Seen) {
        if !seen.insert(self.id()) {
            return;
        }
        for value in self.values() {
            value.traverse(seen);
        }
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Reactive {}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.inner.target)
            .field("readonly", &self.inner.mode.readonly)
            .field("shallow", &self.inner.mode.shallow)
            .finish()
    }
}

impl ReactiveValue for Reactive {
    fn has_changed(&self, old: &Self) -> bool {
        self != old
    }

    fn traverse(&self, seen: &mut Seen) {
        self.traverse_tracked(seen);
    }
}

fn wrap_with(value: Value, mode: ProxyMode) -> Value {
    match value {
        Value::Object(o) if o.is_marked_raw() => Value::Object(o),
        Value::Object(o) => Value::Reactive(Reactive::create(&o, mode)),
        Value::Reactive(r) => {
            let current = r.inner.mode;
            // A readonly view stays readonly when wrapped again.
            if current.readonly && (!mode.readonly || current.shallow == mode.shallow) {
                return Value::Reactive(r);
            }
            if current == mode {
                return Value::Reactive(r);
            }
            let mode = if mode.readonly { mode.over_reactive() } else { mode };
            Value::Reactive(Reactive::create(r.target(), mode))
        }
        other => {
            dev_warn!(
                "{}",
                ReactiveError::NotAnObject {
                    value: format!("{other:?}")
                }
            );
            other
        }
    }
}

/// Wrap an object in its deep reactive view.
///
/// Wrapping a reactive value returns it unchanged; wrapping a scalar
/// returns it unchanged with a dev-mode warning.
pub fn reactive(value: impl Into<Value>) -> Value {
    wrap_with(value.into(), ProxyMode::REACTIVE)
}

pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    wrap_with(value.into(), ProxyMode::SHALLOW_REACTIVE)
}

pub fn readonly(value: impl Into<Value>) -> Value {
    wrap_with(value.into(), ProxyMode::READONLY)
}

pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    wrap_with(value.into(), ProxyMode::SHALLOW_READONLY)
}

/// The raw object behind a view; anything else is returned unchanged.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Reactive(r) => Value::Object(r.target().clone()),
        other => other.clone(),
    }
}

/// True for writable views, and for readonly views taken of a writable
/// view (`readonly(reactive(x))`). A readonly view of a raw object is not
/// reactive.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Reactive(r) if r.is_reactive())
}

pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Reactive(r) if r.is_readonly())
}

pub fn is_shallow(value: &Value) -> bool {
    match value {
        Value::Reactive(r) => r.is_shallow(),
        Value::Ref(r) => r.is_shallow(),
        _ => false,
    }
}

pub fn is_proxy(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// Exclude an object from ever being wrapped.
pub fn mark_raw(value: Value) -> Value {
    if let Value::Object(o) = &value {
        o.mark_raw();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{effect, make_ref, EffectOptions};
    use serde_json::json;
    use std::cell::Cell;

    fn state(json: serde_json::Value) -> Reactive {
        Reactive::new(&Object::from_json(json).unwrap())
    }

    fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let c = Rc::new(Cell::new(0));
        (c.clone(), c)
    }

    #[test]
    fn wrapping_is_idempotent() {
        let raw = Object::new();
        let once = reactive(raw.clone());
        let twice = reactive(once.clone());

        assert_eq!(once, twice);
        assert!(to_raw(&once).same_value(&Value::Object(raw.clone())));
        assert_eq!(Reactive::new(&raw), Reactive::new(&raw));
    }

    #[test]
    fn readonly_of_reactive_is_a_separate_view() {
        let raw = Object::new();
        let rw = reactive(raw.clone());
        let ro = readonly(rw.clone());

        assert!(is_reactive(&rw));
        assert!(is_readonly(&ro));
        assert_ne!(rw, ro);
        assert_eq!(reactive(ro.clone()), ro);
        assert_eq!(readonly(ro.clone()), ro);
    }

    #[test]
    fn readonly_of_reactive_still_reports_reactive() {
        let raw = Object::from_pairs([("nested", Value::Object(Object::new()))]);
        let ro = readonly(reactive(raw.clone()));
        let plain = readonly(raw.clone());

        assert!(is_reactive(&ro) && is_readonly(&ro));
        assert!(!is_reactive(&plain) && is_readonly(&plain));
        assert_ne!(ro, plain);

        let nested = ro.as_reactive().expect("object wraps").get("nested");
        assert!(is_reactive(&nested) && is_readonly(&nested));
        let nested = plain.as_reactive().expect("object wraps").get("nested");
        assert!(!is_reactive(&nested));
    }

    #[test]
    fn scalars_and_raw_marked_objects_are_not_wrapped() {
        assert_eq!(reactive(3), Value::Number(3.0));

        let raw = Object::new().mark_raw();
        assert!(!is_proxy(&reactive(raw)));
    }

    #[test]
    fn write_triggers_reader() {
        let s = state(json!({ "count": 1.0 }));
        let (runs, r) = counter();

        let s2 = s.clone();
        let _e = effect(
            move || {
                s2.get("count");
                r.set(r.get() + 1);
            },
            EffectOptions::default(),
        );

        assert!(s.set("count", 2));
        assert_eq!(runs.get(), 2);

        assert!(!s.set("count", 2));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn adding_a_key_triggers_iteration() {
        let s = state(json!({ "a": 1.0 }));
        let (runs, r) = counter();

        let s2 = s.clone();
        let _e = effect(
            move || {
                s2.keys();
                r.set(r.get() + 1);
            },
            EffectOptions::default(),
        );

        s.set("b", 2);
        assert_eq!(runs.get(), 2);

        s.set("b", 3);
        assert_eq!(runs.get(), 2);

        s.delete("a");
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn missing_keys_are_tracked() {
        let s = state(json!({}));
        let seen = Rc::new(RefCell::new(Value::Null));

        let (s2, out) = (s.clone(), seen.clone());
        let _e = effect(move || *out.borrow_mut() = s2.get("late"), EffectOptions::default());
        assert!(seen.borrow().is_undefined());

        s.set("late", "here");
        assert_eq!(*seen.borrow(), Value::from("here"));
    }

    #[test]
    fn nested_objects_are_wrapped_on_read() {
        let s = state(json!({ "inner": { "n": 1.0 } }));
        let inner = s.get("inner");
        assert!(is_reactive(&inner));

        let ro = Reactive::readonly(s.target());
        assert!(is_readonly(&ro.get("inner")));

        let shallow = Reactive::shallow(s.target());
        assert!(!is_proxy(&shallow.get("inner")));
    }

    #[test]
    fn writes_store_raw_values() {
        let s = state(json!({}));
        let nested = reactive(Object::new());
        s.set("nested", nested.clone());

        assert!(matches!(s.target().get(&Key::from("nested")), Some(Value::Object(_))));
        assert_eq!(s.get("nested"), nested);
    }

    #[test]
    fn readonly_writes_are_rejected() {
        let raw = Object::from_pairs([("a", 1)]);
        let ro = Reactive::readonly(&raw);

        assert!(!ro.set("a", 2));
        assert!(matches!(
            ro.try_set("a", 2),
            Err(ReactiveError::ReadonlyMutation { .. })
        ));
        assert!(!ro.delete("a"));
        assert_eq!(raw.get(&Key::from("a")), Some(Value::Number(1.0)));
    }

    #[test]
    fn readonly_views_still_track() {
        let raw = Object::from_pairs([("a", 1)]);
        let rw = Reactive::new(&raw);
        let ro = Reactive::readonly(&raw);
        let (runs, r) = counter();

        let _e = effect(
            move || {
                ro.get("a");
                r.set(r.get() + 1);
            },
            EffectOptions::default(),
        );

        rw.set("a", 5);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn refs_in_objects_unwrap_and_write_through() {
        let count = make_ref(Value::from(1));
        let s = state(json!({}));
        s.set("count", Value::Ref(count.clone()));

        assert_eq!(s.get("count"), Value::Number(1.0));

        s.set("count", 5);
        assert_eq!(count.get_untracked(), Value::Number(5.0));
    }

    #[test]
    fn arrays_track_length() {
        let list = state(json!([1.0, 2.0]));
        let (runs, r) = counter();

        let l = list.clone();
        let _e = effect(
            move || {
                l.len();
                r.set(r.get() + 1);
            },
            EffectOptions::default(),
        );

        assert_eq!(list.push(3), 3);
        assert_eq!(runs.get(), 2);

        assert_eq!(list.pop(), Some(Value::Number(3.0)));
        assert_eq!(runs.get(), 3);

        list.set_len(0);
        assert_eq!(runs.get(), 4);
        assert!(list.target().is_empty());
    }

    #[test]
    fn views_are_released_when_unused() {
        let raw = Object::new();
        let id = raw.id();
        drop(Reactive::new(&raw));

        let live = PROXIES.with(|p| {
            p.borrow().maps[ProxyMode::REACTIVE.index()]
                .get(&id)
                .is_some_and(|w| w.strong_count() > 0)
        });
        assert!(!live);
    }
}

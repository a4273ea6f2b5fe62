//! Value Model
//!
//! Reactive containers hold dynamically shaped data, so they store
//! [`Value`]s. A `Value` is a scalar, a raw [`Object`], a reactive proxy of an
//! object, or a ref holding another `Value`.
//!
//! # Raw Objects
//!
//! An [`Object`] is an identity-bearing map or array. Reading or writing an
//! `Object` directly is never tracked; wrap it with `reactive` to get a
//! tracked view. Two `Object` handles are the same object when they share
//! storage, which is what `has_changed` compares.
//!
//! # Change Detection
//!
//! [`ReactiveValue`] is implemented by every type that can live in a ref,
//! computed or watcher. `has_changed` is NaN-aware for floats and uses
//! identity for anything with identity.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::container::Reactive;
use super::refs::Ref;
use super::runtime::Runtime;
use super::subscriber::{DepKey, TargetId};
use crate::error::ReactiveError;

/// A key into an [`Object`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Prop(Rc<str>),
    Index(usize),
}

impl Key {
    pub(crate) fn dep(&self) -> DepKey {
        match self {
            Key::Prop(name) => DepKey::Prop(Rc::clone(name)),
            Key::Index(index) => DepKey::Index(*index),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Prop(name) => f.write_str(name),
            Key::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Prop(Rc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Prop(Rc::from(name))
    }
}

impl From<Rc<str>> for Key {
    fn from(name: Rc<str>) -> Self {
        Key::Prop(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

/// A dynamically typed reactive value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Reactive(Reactive),
    Ref(Ref<Value>),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_value_ref(&self) -> Option<&Ref<Value>> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// The raw object behind an `Object` or `Reactive` value.
    pub fn target(&self) -> Option<Object> {
        match self {
            Value::Object(o) => Some(o.clone()),
            Value::Reactive(r) => Some(r.target().clone()),
            _ => None,
        }
    }

    /// Returns true for objects and proxies of objects.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Reactive(_))
    }

    /// Identity for objects, `SameValueZero` for numbers, equality otherwise.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Reactive(a), Value::Reactive(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// An untracked deep snapshot. Cycles become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_with(&mut Seen::new())
    }

    pub(crate) fn to_json_with(&self, seen: &mut Seen) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            Value::String(s) => Json::String(s.to_string()),
            Value::Object(o) => o.to_json_with(seen),
            Value::Reactive(r) => r.target().to_json_with(seen),
            Value::Ref(r) => r.get_untracked().to_json_with(seen),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            _ => self.same_value(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(o) => o.fmt(f),
            Value::Reactive(r) => r.fmt(f),
            Value::Ref(r) => write!(f, "Ref({:?})", r.id()),
        }
    }
}

macro_rules! value_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Number(n as f64)
            }
        })*
    };
}

value_from_number!(i32, i64, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Reactive> for Value {
    fn from(r: Reactive) -> Self {
        Value::Reactive(r)
    }
}

impl From<Ref<Value>> for Value {
    fn from(r: Ref<Value>) -> Self {
        Value::Ref(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::Object(Object::array(items.into_iter().map(Value::from))),
            Json::Object(map) => Value::Object(Object::from_pairs(
                map.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
        }
    }
}

enum Slots {
    Plain(IndexMap<Rc<str>, Value>),
    Array(Vec<Value>),
}

struct ObjectInner {
    id: TargetId,
    slots: RefCell<Slots>,
    skip: Cell<bool>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        Runtime::forget_target(self.id);
    }
}

/// A raw, untracked object or array with identity.
#[derive(Clone)]
pub struct Object {
    inner: Rc<ObjectInner>,
}

impl Object {
    /// An empty plain object.
    pub fn new() -> Self {
        Self::with_slots(Slots::Plain(IndexMap::new()))
    }

    pub fn array<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::with_slots(Slots::Array(values.into_iter().map(Into::into).collect()))
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        Self::with_slots(Slots::Plain(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Build from a JSON object or array.
    pub fn from_json(json: serde_json::Value) -> Result<Self, ReactiveError> {
        match Value::from(json) {
            Value::Object(o) => Ok(o),
            other => Err(ReactiveError::NotAnObject {
                value: format!("{other:?}"),
            }),
        }
    }

    fn with_slots(slots: Slots) -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                id: TargetId::new(),
                slots: RefCell::new(slots),
                skip: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn is_array(&self) -> bool {
        matches!(&*self.inner.slots.borrow(), Slots::Array(_))
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Exclude this object from ever being wrapped in a container.
    pub fn mark_raw(&self) -> Self {
        self.inner.skip.set(true);
        self.clone()
    }

    pub fn is_marked_raw(&self) -> bool {
        self.inner.skip.get()
    }

    /// Map keys that do not fit the object's shape onto ones that do.
    ///
    /// Plain objects take index keys by their decimal name; arrays take
    /// numeric property names as indices.
    pub(crate) fn normalize(&self, key: &Key) -> Option<Key> {
        match (&*self.inner.slots.borrow(), key) {
            (Slots::Plain(_), Key::Index(i)) => Some(Key::Prop(Rc::from(i.to_string()))),
            (Slots::Array(_), Key::Prop(name)) => name.parse().ok().map(Key::Index),
            _ => Some(key.clone()),
        }
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        let key = self.normalize(key)?;
        match (&*self.inner.slots.borrow(), &key) {
            (Slots::Plain(map), Key::Prop(name)) => map.get(name).cloned(),
            (Slots::Array(items), Key::Index(i)) => items.get(*i).cloned(),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        let Some(key) = self.normalize(key) else {
            return false;
        };
        match (&*self.inner.slots.borrow(), &key) {
            (Slots::Plain(map), Key::Prop(name)) => map.contains_key(name),
            (Slots::Array(items), Key::Index(i)) => *i < items.len(),
            _ => false,
        }
    }

    /// Untracked write. Returns the previous value.
    ///
    /// Writing past the end of an array fills the gap with `Undefined`.
    /// A non-numeric property name on an array is rejected.
    pub fn insert(&self, key: &Key, value: Value) -> Result<Option<Value>, ReactiveError> {
        let Some(key) = self.normalize(key) else {
            return Err(ReactiveError::InvalidKey {
                key: key.to_string(),
            });
        };
        let previous = match (&mut *self.inner.slots.borrow_mut(), key) {
            (Slots::Plain(map), Key::Prop(name)) => map.insert(name, value),
            (Slots::Array(items), Key::Index(i)) => {
                if i >= items.len() {
                    items.resize(i, Value::Undefined);
                    items.push(value);
                    None
                } else {
                    Some(std::mem::replace(&mut items[i], value))
                }
            }
            _ => None,
        };
        Ok(previous)
    }

    /// Untracked delete. Array slots become holes (`Undefined`); the
    /// length does not change.
    pub fn remove(&self, key: &Key) -> Option<Value> {
        let key = self.normalize(key)?;
        match (&mut *self.inner.slots.borrow_mut(), &key) {
            (Slots::Plain(map), Key::Prop(name)) => map.shift_remove(name),
            (Slots::Array(items), Key::Index(i)) => items
                .get_mut(*i)
                .map(|slot| std::mem::replace(slot, Value::Undefined)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match &*self.inner.slots.borrow() {
            Slots::Plain(map) => map.len(),
            Slots::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<Key> {
        match &*self.inner.slots.borrow() {
            Slots::Plain(map) => map.keys().cloned().map(Key::Prop).collect(),
            Slots::Array(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    pub fn values(&self) -> Vec<Value> {
        match &*self.inner.slots.borrow() {
            Slots::Plain(map) => map.values().cloned().collect(),
            Slots::Array(items) => items.clone(),
        }
    }

    pub fn entries(&self) -> Vec<(Key, Value)> {
        match &*self.inner.slots.borrow() {
            Slots::Plain(map) => map
                .iter()
                .map(|(k, v)| (Key::Prop(Rc::clone(k)), v.clone()))
                .collect(),
            Slots::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Key::Index(i), v.clone()))
                .collect(),
        }
    }

    /// A new object with the same top-level entries.
    pub fn shallow_clone(&self) -> Self {
        match &*self.inner.slots.borrow() {
            Slots::Plain(map) => Self::with_slots(Slots::Plain(map.clone())),
            Slots::Array(items) => Self::with_slots(Slots::Array(items.clone())),
        }
    }

    /// Resize an array. Returns the removed tail. No-op on plain objects.
    pub(crate) fn truncate_or_extend(&self, len: usize) -> Vec<Value> {
        match &mut *self.inner.slots.borrow_mut() {
            Slots::Array(items) if len < items.len() => items.split_off(len),
            Slots::Array(items) => {
                items.resize(len, Value::Undefined);
                Vec::new()
            }
            Slots::Plain(_) => Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_with(&mut Seen::new())
    }

    fn to_json_with(&self, seen: &mut Seen) -> serde_json::Value {
        if !seen.insert(self.id()) {
            return serde_json::Value::Null;
        }
        let json = match &*self.inner.slots.borrow() {
            Slots::Plain(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json_with(seen)))
                    .collect(),
            ),
            Slots::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json_with(seen)).collect())
            }
        };
        seen.remove(self.id());
        json
    }

    /// Visit nested values without tracking this object itself.
    pub(crate) fn traverse_raw(&self, seen: &mut Seen) {
        if !seen.insert(self.id()) {
            return;
        }
        for value in self.values() {
            value.traverse(seen);
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_array() { "Array" } else { "Object" };
        write!(f, "{kind}(#{}, len {})", self.id().raw(), self.len())
    }
}

/// Identity set guarding recursive traversal against cycles.
#[derive(Debug, Default)]
pub struct Seen(HashSet<TargetId>);

impl Seen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `id` was already visited.
    pub fn insert(&mut self, id: TargetId) -> bool {
        self.0.insert(id)
    }

    fn remove(&mut self, id: TargetId) {
        self.0.remove(&id);
    }
}

/// A type that can be held by a ref, computed or watcher.
pub trait ReactiveValue: Clone + 'static {
    /// Whether replacing `old` with `self` is an observable change.
    fn has_changed(&self, old: &Self) -> bool;

    /// The raw form stored by deep refs.
    fn to_raw(&self) -> Self {
        self.clone()
    }

    /// The form handed out by deep refs.
    fn to_reactive(&self) -> Self {
        self.clone()
    }

    /// Read every reachable nested value so the current effect tracks it.
    fn traverse(&self, _seen: &mut Seen) {}
}

macro_rules! reactive_value_by_eq {
    ($($t:ty),*) => {
        $(impl ReactiveValue for $t {
            fn has_changed(&self, old: &Self) -> bool {
                self != old
            }
        })*
    };
}

reactive_value_by_eq!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, String,
    &'static str, Rc<str>, ()
);

impl ReactiveValue for f64 {
    fn has_changed(&self, old: &Self) -> bool {
        self != old && !(self.is_nan() && old.is_nan())
    }
}

impl ReactiveValue for f32 {
    fn has_changed(&self, old: &Self) -> bool {
        self != old && !(self.is_nan() && old.is_nan())
    }
}

impl<T: ReactiveValue> ReactiveValue for Option<T> {
    fn has_changed(&self, old: &Self) -> bool {
        match (self, old) {
            (Some(new), Some(old)) => new.has_changed(old),
            (None, None) => false,
            _ => true,
        }
    }

    fn to_raw(&self) -> Self {
        self.as_ref().map(T::to_raw)
    }

    fn to_reactive(&self) -> Self {
        self.as_ref().map(T::to_reactive)
    }

    fn traverse(&self, seen: &mut Seen) {
        if let Some(value) = self {
            value.traverse(seen);
        }
    }
}

impl<T: ReactiveValue> ReactiveValue for Vec<T> {
    fn has_changed(&self, old: &Self) -> bool {
        self.len() != old.len() || self.iter().zip(old).any(|(new, old)| new.has_changed(old))
    }

    fn to_raw(&self) -> Self {
        self.iter().map(T::to_raw).collect()
    }

    fn to_reactive(&self) -> Self {
        self.iter().map(T::to_reactive).collect()
    }

    fn traverse(&self, seen: &mut Seen) {
        for value in self {
            value.traverse(seen);
        }
    }
}

impl<A: ReactiveValue, B: ReactiveValue> ReactiveValue for (A, B) {
    fn has_changed(&self, old: &Self) -> bool {
        self.0.has_changed(&old.0) || self.1.has_changed(&old.1)
    }

    fn traverse(&self, seen: &mut Seen) {
        self.0.traverse(seen);
        self.1.traverse(seen);
    }
}

impl<A: ReactiveValue, B: ReactiveValue, C: ReactiveValue> ReactiveValue for (A, B, C) {
    fn has_changed(&self, old: &Self) -> bool {
        self.0.has_changed(&old.0) || self.1.has_changed(&old.1) || self.2.has_changed(&old.2)
    }

    fn traverse(&self, seen: &mut Seen) {
        self.0.traverse(seen);
        self.1.traverse(seen);
        self.2.traverse(seen);
    }
}

impl ReactiveValue for Object {
    fn has_changed(&self, old: &Self) -> bool {
        !self.ptr_eq(old)
    }

    fn traverse(&self, seen: &mut Seen) {
        self.traverse_raw(seen);
    }
}

impl ReactiveValue for Value {
    fn has_changed(&self, old: &Self) -> bool {
        !self.same_value(old)
    }

    fn to_raw(&self) -> Self {
        match self {
            Value::Reactive(r) => Value::Object(r.target().clone()),
            other => other.clone(),
        }
    }

    fn to_reactive(&self) -> Self {
        match self {
            Value::Object(o) if !o.is_marked_raw() => Value::Reactive(Reactive::new(o)),
            other => other.clone(),
        }
    }

    fn traverse(&self, seen: &mut Seen) {
        match self {
            Value::Object(o) => o.traverse_raw(seen),
            Value::Reactive(r) => r.traverse(seen),
            Value::Ref(r) => r.traverse(seen),
            _ => {}
        }
    }
}

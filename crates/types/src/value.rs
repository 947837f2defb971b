//! # Helper Values
//!
//! Dynamic values exchanged with helpers: the arguments a deferred call is
//! recorded with, the results helpers produce, and the host data structures
//! that carry placeholder tokens.
//!
//! Sequences and mappings are shared handles rather than owned trees. Cloning
//! a [`Value`] clones the handle, which keeps container identity stable and
//! makes self-referential graphs expressible:
//!
//! ```rust
//! use deferred_types::{Object, Value};
//!
//! let user = Object::new();
//! user.insert("username", "doowb");
//! user.insert("profile", Value::Object(user.clone()));
//!
//! let profile = user.get("profile").expect("profile field");
//! assert!(profile.as_object().is_some_and(|inner| inner.ptr_eq(&user)));
//! ```

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use thiserror::Error;

/// Printable form used for containers that reference themselves.
pub const CIRCULAR_PLACEHOLDER: &str = "[Circular]";
/// Printable form used for opaque host values.
pub const OPAQUE_PLACEHOLDER: &str = "[opaque]";

/// Errors raised while converting values into JSON.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("value contains a circular reference")]
    Circular,

    #[error("opaque values cannot be represented as JSON")]
    Opaque,
}

/// A dynamically typed helper value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Array),
    Object(Object),
    /// Host value carried through resolution untouched (for example a helper
    /// handed to another helper as an iterator).
    Opaque(Opaque),
}

/// Shared, ordered sequence of values.
#[derive(Clone, Default)]
pub struct Array(Arc<RwLock<Vec<Value>>>);

/// Shared mapping from keys to values, preserving insertion order.
#[derive(Clone, Default)]
pub struct Object(Arc<RwLock<IndexMap<String, Value>>>);

/// Shared reference to an arbitrary host value.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the shared allocation; equal for every clone of this handle.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.read().get(index).cloned()
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.write().push(value.into());
    }

    /// Replaces the element at `index`, returning the previous value.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Option<Value> {
        let mut items = self.write();
        let slot = items.get_mut(index)?;
        Some(std::mem::replace(slot, value.into()))
    }

    /// Shallow copy of the current elements. Nested containers stay shared.
    pub fn snapshot(&self) -> Vec<Value> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the shared allocation; equal for every clone of this handle.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.write().insert(key.into(), value.into())
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Shallow copy of the current entries in insertion order.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.read().iter().map(|(key, value)| (key.clone(), value.clone())).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Value>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Value>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Value {
    /// Wraps an arbitrary host value.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(Opaque::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(number) => number.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(number) => number.as_f64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Borrows the host value behind an [`Value::Opaque`] when it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(opaque) => opaque.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Converts into a JSON tree.
    ///
    /// Fails on cyclic graphs and on opaque values, neither of which has a JSON form.
    pub fn to_json(&self) -> Result<JsonValue, ValueError> {
        to_json_strict(self, &mut Vec::new())
    }

    /// Text substituted for this value when it is spliced into a larger string.
    ///
    /// Strings are emitted verbatim, null as the empty string, numbers and
    /// booleans in their textual form, and containers as compact JSON.
    pub fn to_printable(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            Value::String(text) => text.clone(),
            Value::Opaque(_) => OPAQUE_PLACEHOLDER.to_string(),
            Value::Array(_) | Value::Object(_) => to_json_lossy(self, &mut Vec::new()).to_string(),
        }
    }
}

fn to_json_strict(value: &Value, active: &mut Vec<usize>) -> Result<JsonValue, ValueError> {
    match value {
        Value::Null => Ok(JsonValue::Null),
        Value::Bool(flag) => Ok(JsonValue::Bool(*flag)),
        Value::Number(number) => Ok(JsonValue::Number(number.clone())),
        Value::String(text) => Ok(JsonValue::String(text.clone())),
        Value::Opaque(_) => Err(ValueError::Opaque),
        Value::Array(array) => {
            let identity = array.identity();
            if active.contains(&identity) {
                return Err(ValueError::Circular);
            }
            active.push(identity);
            let converted = array
                .snapshot()
                .iter()
                .map(|item| to_json_strict(item, active))
                .collect::<Result<Vec<_>, _>>();
            active.pop();
            converted.map(JsonValue::Array)
        }
        Value::Object(object) => {
            let identity = object.identity();
            if active.contains(&identity) {
                return Err(ValueError::Circular);
            }
            active.push(identity);
            let mut converted = JsonMap::new();
            for (key, entry) in object.snapshot() {
                match to_json_strict(&entry, active) {
                    Ok(json) => {
                        converted.insert(key, json);
                    }
                    Err(error) => {
                        active.pop();
                        return Err(error);
                    }
                }
            }
            active.pop();
            Ok(JsonValue::Object(converted))
        }
    }
}

fn to_json_lossy(value: &Value, active: &mut Vec<usize>) -> JsonValue {
    match value {
        Value::Opaque(_) => JsonValue::String(OPAQUE_PLACEHOLDER.to_string()),
        Value::Array(array) => {
            let identity = array.identity();
            if active.contains(&identity) {
                return JsonValue::String(CIRCULAR_PLACEHOLDER.to_string());
            }
            active.push(identity);
            let items = array.snapshot().iter().map(|item| to_json_lossy(item, active)).collect();
            active.pop();
            JsonValue::Array(items)
        }
        Value::Object(object) => {
            let identity = object.identity();
            if active.contains(&identity) {
                return JsonValue::String(CIRCULAR_PLACEHOLDER.to_string());
            }
            active.push(identity);
            let entries = object
                .snapshot()
                .into_iter()
                .map(|(key, entry)| (key, to_json_lossy(&entry, active)))
                .collect();
            active.pop();
            JsonValue::Object(entries)
        }
        scalar => to_json_strict(scalar, active).unwrap_or(JsonValue::Null),
    }
}

impl PartialEq for Value {
    /// Structural equality. Containers sharing one allocation compare equal
    /// without being walked.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(left), Value::Bool(right)) => left == right,
            (Value::Number(left), Value::Number(right)) => left == right,
            (Value::String(left), Value::String(right)) => left == right,
            (Value::Array(left), Value::Array(right)) => left == right,
            (Value::Object(left), Value::Object(right)) => left == right,
            (Value::Opaque(left), Value::Opaque(right)) => left.ptr_eq(right),
            _ => false,
        }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.snapshot() == other.snapshot()
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.snapshot() == other.snapshot()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_printable())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = RefCell::new(Vec::new());
        DebugValue { value: self, active: &active }.fmt(f)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Array(self.clone()), f)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Object(self.clone()), f)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Opaque(..)")
    }
}

/// Debug adapter that prints a cycle marker instead of re-entering a container.
struct DebugValue<'a> {
    value: &'a Value,
    active: &'a RefCell<Vec<usize>>,
}

impl fmt::Debug for DebugValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Null => f.write_str("null"),
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Number(number) => write!(f, "{number}"),
            Value::String(text) => write!(f, "{text:?}"),
            Value::Opaque(_) => f.write_str("Opaque(..)"),
            Value::Array(array) => {
                let identity = array.identity();
                if self.active.borrow().contains(&identity) {
                    return f.write_str(CIRCULAR_PLACEHOLDER);
                }
                self.active.borrow_mut().push(identity);
                let items = array.snapshot();
                let result = f
                    .debug_list()
                    .entries(items.iter().map(|item| DebugValue {
                        value: item,
                        active: self.active,
                    }))
                    .finish();
                self.active.borrow_mut().pop();
                result
            }
            Value::Object(object) => {
                let identity = object.identity();
                if self.active.borrow().contains(&identity) {
                    return f.write_str(CIRCULAR_PLACEHOLDER);
                }
                self.active.borrow_mut().push(identity);
                let entries = object.snapshot();
                let result = f
                    .debug_map()
                    .entries(entries.iter().map(|(key, entry)| {
                        (
                            key,
                            DebugValue {
                                value: entry,
                                active: self.active,
                            },
                        )
                    }))
                    .finish();
                self.active.borrow_mut().pop();
                result
            }
        }
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(flag) => Value::Bool(flag),
            JsonValue::Number(number) => Value::Number(number),
            JsonValue::String(text) => Value::String(text),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => Value::Object(map.into_iter().map(|(key, entry)| (key, Value::from(entry))).collect()),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Value::Number(number.into())
    }
}

impl From<i32> for Value {
    fn from(number: i32) -> Self {
        Value::Number(number.into())
    }
}

impl From<u64> for Value {
    fn from(number: u64) -> Self {
        Value::Number(number.into())
    }
}

impl From<f64> for Value {
    /// Non-finite floats have no JSON number form and become null.
    fn from(number: f64) -> Self {
        Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Array(array)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Value::Opaque(opaque)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Array {
    fn from(items: Vec<T>) -> Self {
        items.into_iter().map(Into::into).collect()
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Array(Arc::new(RwLock::new(iter.into_iter().collect())))
    }
}

impl From<IndexMap<String, Value>> for Object {
    fn from(entries: IndexMap<String, Value>) -> Self {
        Object(Arc::new(RwLock::new(entries)))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(key, entry)| (key.into(), entry))
            .collect::<IndexMap<String, Value>>()
            .into()
    }
}

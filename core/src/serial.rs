//! Object-tree serialization with run-time type tags.
//!
//! Every persisted object carries a `__type__` tag naming the type that
//! rebuilds it. Plain maps (such as `GameState::misc`) stay untagged.
//!
//! RULES:
//!   - Transient fields are marked per field (`#[serde(skip)]`) and are
//!     re-established by `Restore::reinit`, never persisted.
//!   - Native callbacks are never silently dropped: saving one fails with
//!     `CoreError::Unserializable`. Wrap the call in an `Action` instead.
//!   - Trait-object families (tasks, items) are restored through a
//!     `Registry` populated at start-up; an unknown tag is a hard error.

use crate::error::{CoreError, CoreResult};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const TYPE_KEY: &str = "__type__";

/// Save side of a persistable type.
pub trait Persist {
    /// Stable tag written into `__type__`.
    fn type_tag(&self) -> &'static str;

    /// The untagged body. Must be a JSON object.
    fn save(&self) -> CoreResult<Value>;
}

/// Restore side of a persistable type, in environment `E`.
pub trait Restore<E: ?Sized>: Sized {
    const TAG: &'static str;

    /// Build an instance from its body (tag and `__dunder__` keys removed).
    fn restore(body: Map<String, Value>, env: &E) -> CoreResult<Self>;

    /// Re-bind transient state after the structural restore.
    fn reinit(&mut self, _env: &E) {}
}

type Factory<T, E> = Box<dyn Fn(Map<String, Value>, &E) -> CoreResult<Box<T>>>;

/// Maps type tags to factories for one trait-object family.
pub struct Registry<T: ?Sized, E: ?Sized> {
    factories: HashMap<&'static str, Factory<T, E>>,
}

impl<T: ?Sized, E: ?Sized> Registry<T, E> {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Register a factory. A later registration for the same tag wins.
    pub fn register<F>(&mut self, tag: &'static str, factory: F)
    where
        F: Fn(Map<String, Value>, &E) -> CoreResult<Box<T>> + 'static,
    {
        self.factories.insert(tag, Box::new(factory));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Rebuild a tagged value.
    pub fn restore(&self, value: Value, env: &E) -> CoreResult<Box<T>> {
        let mut body = into_object(value, "registered type")?;
        let tag = take_tag(&mut body, "registered type")?;
        let factory = self
            .factories
            .get(tag.as_str())
            .ok_or_else(|| CoreError::UnknownType { tag: tag.clone() })?;
        strip_dunder(&mut body);
        factory(body, env)
    }

    pub fn restore_all(&self, values: Vec<Value>, env: &E) -> CoreResult<Vec<Box<T>>> {
        values.into_iter().map(|v| self.restore(v, env)).collect()
    }
}

impl<T: ?Sized, E: ?Sized> Default for Registry<T, E> {
    fn default() -> Self { Self::new() }
}

/// Save an object and stamp it with its type tag.
pub fn to_tagged<P: Persist + ?Sized>(obj: &P) -> CoreResult<Value> {
    let tag = obj.type_tag();
    let mut map = into_object(obj.save()?, tag)?;
    map.insert(TYPE_KEY.to_string(), Value::String(tag.to_string()));
    Ok(Value::Object(map))
}

/// Serialize an object tree to JSON text.
pub fn serialize<P: Persist + ?Sized>(root: &P) -> CoreResult<String> {
    Ok(serde_json::to_string(&to_tagged(root)?)?)
}

/// Restore a statically-typed tagged value.
pub fn restore_tagged<T, E>(value: Value, env: &E) -> CoreResult<T>
where
    T: Restore<E>,
    E: ?Sized,
{
    let mut body = into_object(value, T::TAG)?;
    let tag = take_tag(&mut body, T::TAG)?;
    if tag != T::TAG {
        return Err(CoreError::TypeMismatch { expected: T::TAG.to_string(), found: tag });
    }
    strip_dunder(&mut body);
    restore_as(body, env)
}

/// Deserialize JSON text produced by `serialize`.
pub fn deserialize<T, E>(text: &str, env: &E) -> CoreResult<T>
where
    T: Restore<E>,
    E: ?Sized,
{
    let value: Value = serde_json::from_str(text)?;
    restore_tagged(value, env)
}

/// Structural restore followed by the re-binding hook.
pub fn restore_as<T, E>(body: Map<String, Value>, env: &E) -> CoreResult<T>
where
    T: Restore<E>,
    E: ?Sized,
{
    let mut obj = T::restore(body, env)?;
    obj.reinit(env);
    Ok(obj)
}

/// Default save hook: every non-skipped field.
pub fn save_fields<T: Serialize>(value: &T) -> CoreResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Default restore hook: every field from the body.
pub fn restore_fields<T: DeserializeOwned>(body: Map<String, Value>) -> CoreResult<T> {
    Ok(serde_json::from_value(Value::Object(body))?)
}

pub fn into_object(value: Value, context: &str) -> CoreResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(CoreError::NotAnObject { context: context.to_string() }),
    }
}

/// Remove and return the `__type__` tag.
fn take_tag(body: &mut Map<String, Value>, context: &str) -> CoreResult<String> {
    match body.remove(TYPE_KEY) {
        Some(Value::String(tag)) => Ok(tag),
        _ => Err(CoreError::MissingTypeTag { context: context.to_string() }),
    }
}

/// Drop every `__name__` key.
fn strip_dunder(body: &mut Map<String, Value>) {
    body.retain(|k, _| !is_dunder(k));
}

fn is_dunder(key: &str) -> bool {
    key.len() > 4 && key.starts_with("__") && key.ends_with("__")
}

/// Escape every character outside printable ASCII as `\uXXXX`, so the saved
/// text survives byte-oriented transports.
pub fn json_to_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if (' '..='~').contains(&ch) {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

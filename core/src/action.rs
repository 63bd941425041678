//! Action — a serializable indirect method call.
//!
//! An Action names its receiver by path (`state.items.lighter`) and its
//! method by name (`set_active`), plus fixed leading arguments. Resolution
//! goes through an explicit route table supplied by the environment, so an
//! Action survives a save/restore cycle and binds to the fresh game.
//!
//! The caching variant keeps the resolved route after the first call. The
//! cache is transient: it is dropped on restore and never persisted. Clones
//! share one cache, so a handler run through a copy still warms the original.

use crate::{
    error::{CoreError, CoreResult},
    serial::{restore_fields, save_fields, Persist, Restore},
    types::Seconds,
};
use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::{any::Any, cell::OnceCell, fmt, rc::Rc};

pub const ACTION_TAG: &str = "Action";
pub const CACHING_ACTION_TAG: &str = "CachingAction";

/// Turns a `(target path, method name)` pair into a route.
pub trait Resolve {
    type Route: Clone + 'static;

    fn resolve(&self, target_path: &str, method_name: &str) -> CoreResult<Self::Route>;
}

/// Mutating invocation along a resolved route.
pub trait Invoke: Resolve {
    fn invoke(&mut self, route: &Self::Route, args: Vec<Value>) -> CoreResult<Value>;
}

/// Read-only evaluation along a resolved route.
pub trait Evaluate: Resolve {
    fn evaluate(&self, route: &Self::Route, args: Vec<Value>) -> CoreResult<Value>;
}

#[derive(Clone)]
pub struct Action {
    pub target_path: String,
    pub method_name: String,
    pub args:        Vec<Value>,
    /// Due time, stamped by the scheduler when queued as a one-shot task.
    pub time:        Option<Seconds>,
    caching:         bool,
    cache:           Rc<OnceCell<Rc<dyn Any>>>,
}

impl Action {
    pub fn new(target_path: impl Into<String>, method_name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            target_path: target_path.into(),
            method_name: method_name.into(),
            args,
            time: None,
            caching: false,
            cache: Rc::default(),
        }
    }

    pub fn caching(target_path: impl Into<String>, method_name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(target_path, method_name, args).into_caching()
    }

    /// Split a dotted path at its last dot: `state.flags.set` becomes
    /// target `state.flags`, method `set`.
    pub fn from_path(path: &str, args: Vec<Value>) -> CoreResult<Self> {
        match path.rsplit_once('.') {
            Some((target, method)) if !target.is_empty() && !method.is_empty() => {
                Ok(Self::new(target, method, args))
            }
            _ => Err(CoreError::UnresolvedTarget { path: path.to_string() }),
        }
    }

    pub fn into_caching(mut self) -> Self {
        self.caching = true;
        self
    }

    pub fn is_caching(&self) -> bool { self.caching }

    pub fn is_resolved(&self) -> bool { self.cache.get().is_some() }

    /// Forget the cached route. Clones made earlier keep theirs.
    pub fn invalidate(&mut self) {
        self.cache = Rc::default();
    }

    /// Same receiver and method, ignoring arguments.
    pub fn targets(&self, target_path: &str, method_name: &str) -> bool {
        self.target_path == target_path && self.method_name == method_name
    }

    fn route<R: Resolve + ?Sized>(&self, env: &R) -> CoreResult<R::Route> {
        if !self.caching {
            return env.resolve(&self.target_path, &self.method_name);
        }
        if let Some(route) = self.cache.get().and_then(|r| r.downcast_ref::<R::Route>()) {
            return Ok(route.clone());
        }
        let route = env.resolve(&self.target_path, &self.method_name)?;
        let _ = self.cache.set(Rc::new(route.clone()));
        Ok(route)
    }

    fn full_args(&self, extra: Vec<Value>) -> Vec<Value> {
        let mut args = self.args.clone();
        args.extend(extra);
        args
    }

    /// Invoke with the stored arguments followed by `extra`.
    pub fn run<I: Invoke + ?Sized>(&self, env: &mut I, extra: Vec<Value>) -> CoreResult<Value> {
        let route = self.route(&*env)?;
        env.invoke(&route, self.full_args(extra))
    }

    /// Read-only variant of `run`.
    pub fn eval<Q: Evaluate + ?Sized>(&self, env: &Q, extra: Vec<Value>) -> CoreResult<Value> {
        let route = self.route(env)?;
        env.evaluate(&route, self.full_args(extra))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.type_tag())
            .field("target_path", &self.target_path)
            .field("method_name", &self.method_name)
            .field("args", &self.args)
            .field("time", &self.time)
            .finish()
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.caching == other.caching
            && self.target_path == other.target_path
            && self.method_name == other.method_name
            && self.args == other.args
            && self.time == other.time
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionOut<'a> {
    #[serde(rename = "__type__")]
    kind:        &'static str,
    target_path: &'a str,
    method_name: &'a str,
    args:        &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    time:        Option<Seconds>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionIn {
    #[serde(rename = "__type__", default)]
    kind:        Option<String>,
    target_path: String,
    method_name: String,
    #[serde(default)]
    args:        Vec<Value>,
    #[serde(default)]
    time:        Option<Seconds>,
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ActionOut {
            kind:        self.type_tag(),
            target_path: &self.target_path,
            method_name: &self.method_name,
            args:        &self.args,
            time:        self.time,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = ActionIn::deserialize(deserializer)?;
        let caching = match repr.kind.as_deref() {
            None | Some(ACTION_TAG) => false,
            Some(CACHING_ACTION_TAG) => true,
            Some(other) => {
                return Err(D::Error::custom(format!("unknown action type '{other}'")));
            }
        };
        let mut action = Action::new(repr.target_path, repr.method_name, repr.args);
        action.time = repr.time;
        action.caching = caching;
        Ok(action)
    }
}

impl Persist for Action {
    fn type_tag(&self) -> &'static str {
        if self.caching { CACHING_ACTION_TAG } else { ACTION_TAG }
    }

    fn save(&self) -> CoreResult<Value> {
        save_fields(self)
    }
}

impl<E: ?Sized> Restore<E> for Action {
    const TAG: &'static str = ACTION_TAG;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }

    fn reinit(&mut self, _env: &E) {
        self.invalidate();
    }
}

/// A native closure. Usable wherever an Action is, except that it cannot be
/// persisted: serializing one is an error.
pub struct Native<F: ?Sized> {
    name: String,
    func: Rc<F>,
}

impl<F: ?Sized> Native<F> {
    pub fn from_rc(name: impl Into<String>, func: Rc<F>) -> Self {
        Self { name: name.into(), func }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn func(&self) -> &F { &self.func }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl<F: ?Sized> Clone for Native<F> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), func: Rc::clone(&self.func) }
    }
}

impl<F: ?Sized> fmt::Debug for Native<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({})", self.name)
    }
}

impl<F: ?Sized> Serialize for Native<F> {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(format!(
            "cannot serialize native callback '{}'; wrap it in an Action",
            self.name
        )))
    }
}

impl<'de, F: ?Sized> Deserialize<'de> for Native<F> {
    fn deserialize<D: Deserializer<'de>>(_deserializer: D) -> Result<Self, D::Error> {
        Err(D::Error::custom("native callbacks are never persisted"))
    }
}

/// Loose truthiness: null, false, zero and the empty string are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0 && !x.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn arg_f64(method: &str, args: &[Value], index: usize) -> CoreResult<f64> {
    args.get(index).and_then(Value::as_f64).ok_or_else(|| CoreError::BadArgument {
        method: method.to_string(),
        index,
        expected: "a number",
    })
}

/// Optional numeric argument; a missing or null slot yields `default`.
pub fn arg_f64_or(method: &str, args: &[Value], index: usize, default: f64) -> CoreResult<f64> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => arg_f64(method, args, index),
    }
}

pub fn arg_bool(method: &str, args: &[Value], index: usize) -> CoreResult<bool> {
    args.get(index).map(truthy).ok_or_else(|| CoreError::BadArgument {
        method: method.to_string(),
        index,
        expected: "a boolean",
    })
}

pub fn arg_str<'a>(method: &str, args: &'a [Value], index: usize) -> CoreResult<&'a str> {
    args.get(index).and_then(Value::as_str).ok_or_else(|| CoreError::BadArgument {
        method: method.to_string(),
        index,
        expected: "a string",
    })
}

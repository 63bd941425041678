//! Variable — a bounded numeric quantity with a two-phase per-tick update.
//!
//! PHASES:
//!   1. update():      sum handler rates over one fixed step into a pending
//!                     value. `value` is untouched, so every handler of every
//!                     Variable sees the pre-tick world.
//!   2. update_late(): commit the pending value, then notify late handlers.
//!
//! Modulo reduction is applied before clamping to [min, max].
//! Late handlers do not get a consistent world view across Variables: some
//! may already be committed for this tick and some not.

use crate::{
    action::{Action, Native},
    error::{CoreError, CoreResult},
    serial::{restore_fields, save_fields, Persist, Restore},
    types::Seconds,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::rc::Rc;

pub const VARIABLE_TAG: &str = "Variable";

type RateFn = dyn Fn(&Variable) -> f64;
type LateFn = dyn Fn(f64);

/// A per-second contribution to a Variable's rate of change.
#[derive(Debug, Clone)]
pub enum Handler {
    Rate(f64),
    Action(Action),
    Native(Native<RateFn>),
}

impl Handler {
    pub fn native(name: impl Into<String>, func: impl Fn(&Variable) -> f64 + 'static) -> Self {
        let func: Rc<RateFn> = Rc::new(func);
        Handler::Native(Native::from_rc(name, func))
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Handler::Rate(a), Handler::Rate(b)) => a == b,
            (Handler::Action(a), Handler::Action(b)) => a == b,
            (Handler::Native(a), Handler::Native(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Invoked with the committed value after each update.
#[derive(Debug, Clone)]
pub enum LateHandler {
    Action(Action),
    Native(Native<LateFn>),
}

impl LateHandler {
    pub fn native(name: impl Into<String>, func: impl Fn(f64) + 'static) -> Self {
        let func: Rc<LateFn> = Rc::new(func);
        LateHandler::Native(Native::from_rc(name, func))
    }
}

impl PartialEq for LateHandler {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LateHandler::Action(a), LateHandler::Action(b)) => a == b,
            (LateHandler::Native(a), LateHandler::Native(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

#[derive(Serialize)]
struct RateOut {
    rate: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HandlerIn {
    Rate { rate: f64 },
    Action(Action),
}

impl Serialize for Handler {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Handler::Rate(rate) => RateOut { rate: *rate }.serialize(serializer),
            Handler::Action(action) => action.serialize(serializer),
            Handler::Native(native) => native.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Handler {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match HandlerIn::deserialize(deserializer)? {
            HandlerIn::Rate { rate } => Handler::Rate(rate),
            HandlerIn::Action(action) => Handler::Action(action),
        })
    }
}

impl Serialize for LateHandler {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LateHandler::Action(action) => action.serialize(serializer),
            LateHandler::Native(native) => native.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for LateHandler {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Action::deserialize(deserializer).map(LateHandler::Action)
    }
}

/// Evaluates Action handlers against the surrounding world, read-only.
pub trait RateSource {
    fn rate(&self, action: &Action, variable: &Variable) -> CoreResult<f64>;
}

/// Delivers Action late handlers.
pub trait LateDispatch {
    fn late(&mut self, action: &Action, value: f64) -> CoreResult<()>;
}

/// A world with nothing to resolve against: Action handlers fail, rate and
/// native handlers work.
pub struct Detached;

impl RateSource for Detached {
    fn rate(&self, action: &Action, _variable: &Variable) -> CoreResult<f64> {
        Err(CoreError::UnresolvedTarget { path: action.target_path.clone() })
    }
}

impl LateDispatch for Detached {
    fn late(&mut self, action: &Action, _value: f64) -> CoreResult<()> {
        Err(CoreError::UnresolvedTarget { path: action.target_path.clone() })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub value:     f64,
    pub min:       Option<f64>,
    pub max:       Option<f64>,
    #[serde(rename = "mod", default)]
    pub modulus:   Option<f64>,
    #[serde(default)]
    handlers:      Vec<Handler>,
    #[serde(default)]
    late_handlers: Vec<LateHandler>,
    #[serde(skip)]
    pending:       Option<f64>,
}

impl Variable {
    pub fn new(value: f64, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            value,
            min,
            max,
            modulus: None,
            handlers: Vec::new(),
            late_handlers: Vec::new(),
            pending: None,
        }
    }

    pub fn with_mod(mut self, modulus: f64) -> Self {
        self.modulus = Some(modulus);
        self
    }

    /// The value, optionally scaled by `factor`.
    pub fn get_value(&self, factor: Option<f64>) -> f64 {
        match factor {
            Some(factor) => self.value * factor,
            None => self.value,
        }
    }

    /// The uncommitted result of the last update(), if any.
    pub fn pending(&self) -> Option<f64> { self.pending }

    pub fn handlers(&self) -> &[Handler] { &self.handlers }

    pub fn late_handlers(&self) -> &[LateHandler] { &self.late_handlers }

    pub fn add_handler(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }

    pub fn remove_handler(&mut self, handler: &Handler) -> bool {
        match self.handlers.iter().position(|h| h == handler) {
            Some(at) => {
                self.handlers.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn add_late_handler(&mut self, handler: LateHandler) {
        self.late_handlers.push(handler);
    }

    pub fn remove_late_handler(&mut self, handler: &LateHandler) -> bool {
        match self.late_handlers.iter().position(|h| h == handler) {
            Some(at) => {
                self.late_handlers.remove(at);
                true
            }
            None => false,
        }
    }

    fn rate_of<R: RateSource + ?Sized>(&self, handler: &Handler, source: &R) -> CoreResult<f64> {
        match handler {
            Handler::Rate(rate) => Ok(*rate),
            Handler::Action(action) => source.rate(action, self),
            Handler::Native(native) => Ok((native.func())(self)),
        }
    }

    /// The value this Variable would take after one step, reduced and
    /// clamped. Pure: nothing is staged.
    pub fn compute<R: RateSource + ?Sized>(&self, step: Seconds, source: &R) -> CoreResult<f64> {
        let mut next = self.value;
        for handler in &self.handlers {
            next += self.rate_of(handler, source)? * step;
        }
        if let Some(modulus) = self.modulus {
            next %= modulus;
        }
        if let Some(min) = self.min {
            if next < min {
                next = min;
            }
        }
        if let Some(max) = self.max {
            if next > max {
                next = max;
            }
        }
        Ok(next)
    }

    /// Stage a value computed elsewhere by `compute()`.
    pub fn stage(&mut self, next: f64) {
        self.pending = Some(next);
    }

    /// Phase one.
    pub fn update<R: RateSource + ?Sized>(&mut self, step: Seconds, source: &R) -> CoreResult<()> {
        let next = self.compute(step, source)?;
        self.stage(next);
        Ok(())
    }

    /// Phase two without notification. Fails if nothing is staged.
    pub fn commit(&mut self) -> CoreResult<f64> {
        let next = self.pending.take().ok_or(CoreError::NoPendingUpdate)?;
        self.value = next;
        Ok(next)
    }

    /// Phase two: commit, then run the late handlers with the new value.
    pub fn update_late<D: LateDispatch + ?Sized>(&mut self, dispatch: &mut D) -> CoreResult<()> {
        let value = self.commit()?;
        notify_late(&self.late_handlers, value, dispatch)
    }

    /// Name of the first native handler, which would make saving fail.
    fn first_native(&self) -> Option<&str> {
        let rate = self.handlers.iter().find_map(|h| match h {
            Handler::Native(n) => Some(n.name()),
            _ => None,
        });
        rate.or_else(|| {
            self.late_handlers.iter().find_map(|h| match h {
                LateHandler::Native(n) => Some(n.name()),
                _ => None,
            })
        })
    }
}

/// Run `handlers` for a freshly committed `value`.
pub fn notify_late<D: LateDispatch + ?Sized>(
    handlers: &[LateHandler],
    value:    f64,
    dispatch: &mut D,
) -> CoreResult<()> {
    for handler in handlers {
        match handler {
            LateHandler::Native(native) => (native.func())(value),
            LateHandler::Action(action) => dispatch.late(action, value)?,
        }
    }
    Ok(())
}

impl Persist for Variable {
    fn type_tag(&self) -> &'static str { VARIABLE_TAG }

    fn save(&self) -> CoreResult<Value> {
        if let Some(name) = self.first_native() {
            return Err(CoreError::Unserializable { name: name.to_string() });
        }
        save_fields(self)
    }
}

impl<E: ?Sized> Restore<E> for Variable {
    const TAG: &'static str = VARIABLE_TAG;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }

    fn reinit(&mut self, _env: &E) {
        for handler in &mut self.handlers {
            if let Handler::Action(action) = handler {
                action.invalidate();
            }
        }
        for handler in &mut self.late_handlers {
            if let LateHandler::Action(action) = handler {
                action.invalidate();
            }
        }
    }
}

//! FlagSet — named booleans, some derived from others by AND / OR.
//!
//! RULES:
//!   - set() on a derived name fails; derived values change only through
//!     their operands.
//!   - A change cascades to dependents before the changed flag's own late
//!     handlers are queued.
//!   - Late handlers are never called during the cascade. set() and derive()
//!     return a FlagChange whose notices the caller delivers once the table
//!     has settled.
//!   - Derivations may not form cycles.

use crate::{
    action::{Action, Native},
    error::{CoreError, CoreResult},
    serial::{restore_fields, save_fields, Persist, Restore},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    rc::Rc,
    str::FromStr,
};

pub const FLAG_SET_TAG: &str = "FlagSet";

type FlagFn = dyn Fn(&str, bool);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    And,
    Or,
}

impl FromStr for Operator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "and" => Ok(Operator::And),
            "or" => Ok(Operator::Or),
            other => Err(CoreError::UnknownOperator { op: other.to_string() }),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::And => "and",
            Operator::Or => "or",
        })
    }
}

/// Called with `(name, value)` whenever a flag changes.
#[derive(Debug, Clone)]
pub enum FlagHandler {
    Action(Action),
    Native(Native<FlagFn>),
}

impl FlagHandler {
    pub fn native(name: impl Into<String>, func: impl Fn(&str, bool) + 'static) -> Self {
        let func: Rc<FlagFn> = Rc::new(func);
        FlagHandler::Native(Native::from_rc(name, func))
    }
}

impl PartialEq for FlagHandler {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FlagHandler::Action(a), FlagHandler::Action(b)) => a == b,
            (FlagHandler::Native(a), FlagHandler::Native(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Serialize for FlagHandler {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FlagHandler::Action(action) => action.serialize(serializer),
            FlagHandler::Native(native) => native.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FlagHandler {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Action::deserialize(deserializer).map(FlagHandler::Action)
    }
}

/// Delivers Action flag handlers.
pub trait FlagDispatch {
    fn flag_changed(&mut self, action: &Action, name: &str, value: bool) -> CoreResult<()>;
}

/// A queued late-handler call.
#[derive(Debug, Clone)]
pub struct Notice {
    pub handler: FlagHandler,
    pub name:    String,
    pub value:   bool,
}

/// Outcome of set() or derive(): whether the named flag changed, plus the
/// late-handler calls the change produced.
#[must_use = "late handlers only run when the change is delivered"]
#[derive(Debug, Default)]
pub struct FlagChange {
    pub changed: bool,
    pub notices: Vec<Notice>,
}

impl FlagChange {
    /// Run every queued handler in cascade order. Returns `changed`.
    pub fn deliver<D: FlagDispatch + ?Sized>(self, dispatch: &mut D) -> CoreResult<bool> {
        for notice in &self.notices {
            match &notice.handler {
                FlagHandler::Native(native) => (native.func())(&notice.name, notice.value),
                FlagHandler::Action(action) => dispatch.flag_changed(action, &notice.name, notice.value)?,
            }
        }
        Ok(self.changed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    pub op:       Operator,
    pub operands: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSet {
    values:        BTreeMap<String, bool>,
    #[serde(default)]
    derived:       BTreeMap<String, Derivation>,
    #[serde(default)]
    late_handlers: BTreeMap<String, Vec<FlagHandler>>,
    /// operand -> derived flags reading it. None when stale.
    #[serde(skip)]
    dependents:    Option<HashMap<String, Vec<String>>>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// None for a flag that was never set.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.values.get(name).copied()
    }

    /// Unset flags read as false.
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }

    pub fn is_derived(&self, name: &str) -> bool {
        self.derived.contains_key(name)
    }

    pub fn derivation(&self, name: &str) -> Option<&Derivation> {
        self.derived.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.keys().map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: bool) -> CoreResult<FlagChange> {
        if self.is_derived(name) {
            return Err(CoreError::DerivedFlagAssignment { name: name.to_string() });
        }
        let mut notices = Vec::new();
        let changed = self.assign(name, value, &mut notices);
        Ok(FlagChange { changed, notices })
    }

    /// Register (or replace) a derived flag and compute its value at once.
    pub fn derive(&mut self, name: &str, op: &str, operands: &[&str]) -> CoreResult<FlagChange> {
        let op: Operator = op.parse()?;
        self.derive_with(name, op, operands.iter().map(|s| s.to_string()).collect())
    }

    pub fn derive_with(&mut self, name: &str, op: Operator, operands: Vec<String>) -> CoreResult<FlagChange> {
        if operands.iter().any(|o| self.reaches(o, name, &mut HashSet::new())) {
            return Err(CoreError::DerivationCycle { name: name.to_string(), operands });
        }
        log::debug!("derive flag '{name}' = {op} {operands:?}");
        self.derived.insert(name.to_string(), Derivation { op, operands });
        self.dependents = None;
        // Forgetting the old value makes the recompute notify unconditionally.
        self.values.remove(name);

        let mut notices = Vec::new();
        let changed = self.refresh(name, None, op == Operator::And, &mut notices);
        Ok(FlagChange { changed, notices })
    }

    pub fn add_late_handler(&mut self, name: &str, handler: FlagHandler) {
        self.late_handlers.entry(name.to_string()).or_default().push(handler);
    }

    pub fn late_handlers(&self, name: &str) -> &[FlagHandler] {
        self.late_handlers.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn remove_late_handler(&mut self, name: &str, handler: &FlagHandler) -> bool {
        let Some(handlers) = self.late_handlers.get_mut(name) else {
            return false;
        };
        let Some(at) = handlers.iter().position(|h| h == handler) else {
            return false;
        };
        handlers.remove(at);
        if handlers.is_empty() {
            self.late_handlers.remove(name);
        }
        true
    }

    /// Whether `from` is `target` or depends on it through derivations.
    fn reaches(&self, from: &str, target: &str, seen: &mut HashSet<String>) -> bool {
        if from == target {
            return true;
        }
        if !seen.insert(from.to_string()) {
            return false;
        }
        match self.derived.get(from) {
            Some(der) => der.operands.iter().any(|o| self.reaches(o, target, seen)),
            None => false,
        }
    }

    fn dependents_of(&mut self, name: &str) -> Vec<String> {
        let index = self.dependents.get_or_insert_with(|| {
            let mut index: HashMap<String, Vec<String>> = HashMap::new();
            for (derived, der) in &self.derived {
                for operand in &der.operands {
                    let list = index.entry(operand.clone()).or_default();
                    if !list.contains(derived) {
                        list.push(derived.clone());
                    }
                }
            }
            index
        });
        index.get(name).cloned().unwrap_or_default()
    }

    /// The only place a value is written.
    fn assign(&mut self, name: &str, value: bool, notices: &mut Vec<Notice>) -> bool {
        if self.values.get(name) == Some(&value) {
            return false;
        }
        self.values.insert(name.to_string(), value);

        for dependent in self.dependents_of(name) {
            self.refresh(&dependent, Some(name), value, notices);
        }
        if let Some(handlers) = self.late_handlers.get(name) {
            notices.extend(handlers.iter().map(|handler| Notice {
                handler: handler.clone(),
                name:    name.to_string(),
                value,
            }));
        }
        true
    }

    /// Recompute `derived` after `changed` became `value`. Operands other
    /// than `changed` are read at their current value.
    fn refresh(&mut self, derived: &str, changed: Option<&str>, value: bool, notices: &mut Vec<Notice>) -> bool {
        let Some(der) = self.derived.get(derived) else {
            return false;
        };
        let mut others = der
            .operands
            .iter()
            .filter(|o| Some(o.as_str()) != changed)
            .map(|o| self.is_set(o));
        let next = match der.op {
            Operator::And => value && others.all(|v| v),
            Operator::Or => value || others.any(|v| v),
        };
        self.assign(derived, next, notices)
    }

    fn first_native(&self) -> Option<&str> {
        self.late_handlers.values().flatten().find_map(|h| match h {
            FlagHandler::Native(native) => Some(native.name()),
            FlagHandler::Action(_) => None,
        })
    }
}

impl Persist for FlagSet {
    fn type_tag(&self) -> &'static str { FLAG_SET_TAG }

    fn save(&self) -> CoreResult<Value> {
        if let Some(name) = self.first_native() {
            return Err(CoreError::Unserializable { name: name.to_string() });
        }
        save_fields(self)
    }
}

impl<E: ?Sized> Restore<E> for FlagSet {
    const TAG: &'static str = FLAG_SET_TAG;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }

    fn reinit(&mut self, _env: &E) {
        self.dependents = None;
        for handler in self.late_handlers.values_mut().flatten() {
            if let FlagHandler::Action(action) = handler {
                action.invalidate();
            }
        }
    }
}

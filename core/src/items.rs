//! Items — the things a player can interact with.
//!
//! RULES:
//!   - Every item is persistable and restorable by its KIND tag.
//!   - Items reach the world only through the GameEnv passed to invoke();
//!     they keep no back-reference to the game.
//!   - Rate handlers an item installs call its query() side, which is
//!     read-only. Anything that must mutate goes in a late handler.
//!   - An item's own variables are "<item>/<var>" and leave with it.

use crate::{
    action::{arg_bool, arg_f64, arg_f64_or, arg_str, Action},
    env::{create_task, item_path, make_variable_handler, GameEnv},
    error::{CoreError, CoreResult},
    event::UiEvent,
    serial::{restore_fields, save_fields, Persist, Restore},
    state::GameState,
    variable::{Handler, LateHandler},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::any::Any;

pub trait Item: Persist {
    fn name(&self) -> &str;

    fn activity(&self) -> Option<&Activity> { None }

    fn activity_mut(&mut self) -> Option<&mut Activity> { None }

    fn is_active(&self) -> bool {
        self.activity().is_some_and(|a| a.active)
    }

    /// Whether invoke() or query() answers `method`.
    fn responds_to(&self, method: &str) -> bool;

    /// Run a mutating method. The item is checked out of the state for the
    /// duration of the call.
    fn invoke(&mut self, method: &str, args: Vec<Value>, env: &mut GameEnv<'_>) -> CoreResult<Value>;

    /// Run a read-only method, as used by rate handlers.
    fn query(&self, method: &str, _args: &[Value], _state: &GameState) -> CoreResult<Value> {
        Err(no_method(self.name(), method))
    }

    /// Called once when the item is added: create variables, wire handlers.
    fn install(&mut self, _env: &mut GameEnv<'_>) -> CoreResult<()> { Ok(()) }

    /// Called once when the item is removed: undo wiring on foreign state.
    fn on_remove(&mut self, _env: &mut GameEnv<'_>) -> CoreResult<()> { Ok(()) }

    /// Names of the variables this item owns.
    fn variables(&self) -> Vec<String> { Vec::new() }

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

fn no_method(name: &str, method: &str) -> CoreError {
    CoreError::UnresolvedMethod { path: item_path(name), method: method.to_string() }
}

fn own_var(item: &str, var: &str) -> String {
    format!("{item}/{var}")
}

const LISTENER_METHODS: &[&str] = &["add_listener", "remove_listener_for", "bind_flag"];

/// On/off state plus the Actions told about every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub active:    bool,
    #[serde(default)]
    pub listeners: Vec<Action>,
}

impl Activity {
    /// Listen with `method` (relative to the game); it receives the fixed
    /// `args` followed by `[active, item-name]`.
    pub fn add_listener(&mut self, method: &str, args: Vec<Value>) -> CoreResult<()> {
        self.listeners.push(create_task(method, args)?);
        Ok(())
    }

    /// Remove the first listener calling `method`, whatever its arguments.
    pub fn remove_listener_for(&mut self, method: &str) -> CoreResult<bool> {
        let probe = create_task(method, Vec::new())?;
        match self
            .listeners
            .iter()
            .position(|l| l.targets(&probe.target_path, &probe.method_name))
        {
            Some(at) => {
                self.listeners.remove(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Keep `flag` equal to the activity state.
    pub fn bind_flag(&mut self, flag: &str) -> CoreResult<()> {
        self.add_listener("state.flags.set", vec![json!(flag)])
    }

    /// Returns whether the state changed.
    pub fn set(&mut self, item: &str, active: bool, env: &mut GameEnv<'_>) -> CoreResult<bool> {
        if active == self.active {
            return Ok(false);
        }
        self.active = active;
        env.state.emit(UiEvent::ActivityChanged { item: item.to_string(), active });
        for listener in &self.listeners {
            listener.run(env, vec![json!(active), json!(item)])?;
        }
        Ok(true)
    }

    fn reinit(&mut self) {
        for listener in &mut self.listeners {
            listener.invalidate();
        }
    }

    /// The listener methods every active item answers; None for others.
    fn call(&mut self, method: &str, args: &[Value]) -> CoreResult<Option<Value>> {
        Ok(Some(match method {
            "add_listener" => {
                let target = arg_str(method, args, 0)?;
                self.add_listener(target, args[1..].to_vec())?;
                Value::Null
            }
            "remove_listener_for" => json!(self.remove_listener_for(arg_str(method, args, 0)?)?),
            "bind_flag" => {
                self.bind_flag(arg_str(method, args, 0)?)?;
                Value::Null
            }
            _ => return Ok(None),
        }))
    }
}

/// A variable this item feeds, and with what factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub variable: String,
    pub factor:   f64,
}

// ── Label ──────────────────────────────────────────────────

/// A featureless piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub text: String,
}

impl Label {
    pub const KIND: &'static str = "Label";

    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into() }
    }
}

impl Item for Label {
    fn name(&self) -> &str { &self.name }

    fn responds_to(&self, method: &str) -> bool {
        method == "set_text"
    }

    fn invoke(&mut self, method: &str, args: Vec<Value>, _env: &mut GameEnv<'_>) -> CoreResult<Value> {
        match method {
            "set_text" => {
                self.text = arg_str(method, &args, 0)?.to_string();
                Ok(Value::Null)
            }
            _ => Err(no_method(&self.name, method)),
        }
    }

    fn as_any(&self) -> &dyn Any { self }
}

// ── Button ─────────────────────────────────────────────────

/// Schedules a stored game method when used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Button {
    pub name:   String,
    pub text:   String,
    /// Game-relative method path, as for create_task.
    pub method: String,
    #[serde(default)]
    pub args:   Vec<Value>,
    #[serde(default)]
    pub delay:  f64,
    /// Item whose activity this button follows.
    #[serde(default)]
    anchor:     Option<String>,
}

impl Button {
    pub const KIND: &'static str = "Button";
    const METHODS: &'static [&'static str] = &["use", "set_text", "show_when_active", "update_visibility"];

    pub fn new(name: impl Into<String>, text: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            method: method.into(),
            args,
            delay: 0.0,
            anchor: None,
        }
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    pub fn anchor(&self) -> Option<&str> { self.anchor.as_deref() }

    fn listener_method(&self) -> String {
        format!("{}.update_visibility", item_path(&self.name))
    }

    fn detach(&mut self, env: &mut GameEnv<'_>) -> CoreResult<()> {
        if let Some(old) = self.anchor.take() {
            let method = self.listener_method();
            if let Some(activity) = env.state.item_mut(&old).and_then(|i| i.activity_mut()) {
                activity.remove_listener_for(&method)?;
            }
        }
        Ok(())
    }

    /// Show this button in `tab` exactly while `item` is active. With no
    /// item, stop following.
    pub fn show_when_active(&mut self, tab: Option<&str>, item: Option<&str>, env: &mut GameEnv<'_>) -> CoreResult<()> {
        self.detach(env)?;
        let (Some(tab), Some(item)) = (tab, item) else {
            return Ok(());
        };
        let method = self.listener_method();
        let anchor = env
            .state
            .item_mut(item)
            .ok_or_else(|| CoreError::UnknownItem { name: item.to_string() })?;
        let active = anchor.is_active();
        anchor
            .activity_mut()
            .ok_or_else(|| no_method(item, "add_listener"))?
            .add_listener(&method, vec![json!(tab)])?;
        self.anchor = Some(item.to_string());
        env.state.show_item(tab, &self.name, active)
    }
}

impl Item for Button {
    fn name(&self) -> &str { &self.name }

    fn responds_to(&self, method: &str) -> bool {
        Self::METHODS.contains(&method)
    }

    fn invoke(&mut self, method: &str, args: Vec<Value>, env: &mut GameEnv<'_>) -> CoreResult<Value> {
        match method {
            "use" => {
                let id = env.add_task(self.delay, &self.method, self.args.clone())?;
                Ok(json!(id.raw()))
            }
            "set_text" => {
                self.text = arg_str(method, &args, 0)?.to_string();
                Ok(Value::Null)
            }
            "show_when_active" => {
                let tab = args.first().and_then(Value::as_str);
                let item = args.get(1).and_then(Value::as_str);
                self.show_when_active(tab, item, env)?;
                Ok(Value::Null)
            }
            "update_visibility" => {
                let tab = arg_str(method, &args, 0)?;
                let active = arg_bool(method, &args, 1)?;
                env.state.show_item(tab, &self.name, active)?;
                Ok(Value::Null)
            }
            _ => Err(no_method(&self.name, method)),
        }
    }

    fn on_remove(&mut self, env: &mut GameEnv<'_>) -> CoreResult<()> {
        self.detach(env)
    }

    fn as_any(&self) -> &dyn Any { self }
}

// ── Lighter ────────────────────────────────────────────────

/// Burns fuel while lit. Refuses to light when empty and goes out when the
/// fuel runs out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lighter {
    pub name:     String,
    #[serde(flatten)]
    activity:     Activity,
    pub capacity: f64,
    #[serde(skip)]
    initial_fill: f64,
}

impl Lighter {
    pub const KIND: &'static str = "Lighter";
    pub const CONSUMPTION_PER_SECOND: f64 = 0.5;
    const METHODS: &'static [&'static str] = &["use", "set_active", "check_fuel", "refill", "deplete"];

    pub fn new(name: impl Into<String>, capacity: f64, fill: f64) -> Self {
        Self {
            name: name.into(),
            activity: Activity::default(),
            capacity,
            initial_fill: fill,
        }
    }

    pub fn fill_var(&self) -> String {
        own_var(&self.name, "fill")
    }

    pub fn set_active(&mut self, on: bool, env: &mut GameEnv<'_>) -> CoreResult<bool> {
        if on && !self.activity.active {
            let fill = env.state.variable(&self.fill_var())?.value;
            if fill < 1e-6 {
                env.state.show_message("The lighter is burnt out.");
                return Ok(false);
            }
        }
        self.activity.set(&self.name, on, env)
    }
}

impl Item for Lighter {
    fn name(&self) -> &str { &self.name }

    fn activity(&self) -> Option<&Activity> { Some(&self.activity) }

    fn activity_mut(&mut self) -> Option<&mut Activity> { Some(&mut self.activity) }

    fn responds_to(&self, method: &str) -> bool {
        Self::METHODS.contains(&method) || LISTENER_METHODS.contains(&method)
    }

    fn invoke(&mut self, method: &str, args: Vec<Value>, env: &mut GameEnv<'_>) -> CoreResult<Value> {
        match method {
            "use" => {
                let on = !self.activity.active;
                Ok(json!(self.set_active(on, env)?))
            }
            "set_active" => {
                let on = arg_bool(method, &args, 0)?;
                Ok(json!(self.set_active(on, env)?))
            }
            "check_fuel" => {
                let value = arg_f64(method, &args, 0)?;
                if value <= 0.0 && self.activity.active {
                    log::debug!("lighter '{}' burnt out", self.name);
                    self.activity.set(&self.name, false, env)?;
                }
                Ok(Value::Null)
            }
            "refill" => {
                let amount = arg_f64(method, &args, 0)?;
                let capacity = self.capacity;
                let var = env.state.variable_mut(&self.fill_var())?;
                var.value = (var.value + amount).min(capacity);
                Ok(json!(var.value))
            }
            _ => match self.activity.call(method, &args)? {
                Some(out) => Ok(out),
                None => Err(no_method(&self.name, method)),
            },
        }
    }

    fn query(&self, method: &str, _args: &[Value], _state: &GameState) -> CoreResult<Value> {
        match method {
            "deplete" if self.activity.active => Ok(json!(-Self::CONSUMPTION_PER_SECOND)),
            "deplete" => Ok(json!(0.0)),
            _ => Err(no_method(&self.name, method)),
        }
    }

    fn install(&mut self, env: &mut GameEnv<'_>) -> CoreResult<()> {
        let path = item_path(&self.name);
        let fill = self.initial_fill.clamp(0.0, self.capacity);
        let var = env.state.make_variable(&self.fill_var(), fill, Some(0.0), Some(self.capacity));
        var.add_handler(Handler::Action(Action::caching(path.clone(), "deplete", Vec::new())));
        var.add_late_handler(LateHandler::Action(Action::caching(path, "check_fuel", Vec::new())));
        Ok(())
    }

    fn variables(&self) -> Vec<String> {
        vec![self.fill_var()]
    }

    fn as_any(&self) -> &dyn Any { self }
}

// ── Crank ──────────────────────────────────────────────────

/// Speed rises while turned and decays otherwise; rotation integrates speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crank {
    pub name:       String,
    pub speed_cap:  f64,
    pub speed_incr: f64,
    pub speed_decr: f64,
    #[serde(default)]
    attached:       Vec<Attachment>,
    #[serde(skip)]
    turning:        bool,
}

impl Crank {
    pub const KIND: &'static str = "Crank";
    const METHODS: &'static [&'static str] = &["use", "turn", "attach_to", "increment"];

    pub fn new(name: impl Into<String>, speed_cap: f64, speed_incr: f64, speed_decr: f64) -> Self {
        Self {
            name: name.into(),
            speed_cap,
            speed_incr,
            speed_decr,
            attached: Vec::new(),
            turning: false,
        }
    }

    pub fn speed_var(&self) -> String {
        own_var(&self.name, "speed")
    }

    pub fn rotation_var(&self) -> String {
        own_var(&self.name, "rotation")
    }

    pub fn is_turning(&self) -> bool { self.turning }

    pub fn attached(&self) -> &[Attachment] { &self.attached }

    /// Feed this crank's speed, times `factor`, into `variable`.
    pub fn attach_to(&mut self, variable: &str, factor: f64, env: &mut GameEnv<'_>) -> CoreResult<()> {
        let handler = make_variable_handler(&self.speed_var(), factor);
        env.state.variable_mut(variable)?.add_handler(Handler::Action(handler));
        self.attached.push(Attachment { variable: variable.to_string(), factor });
        Ok(())
    }
}

impl Item for Crank {
    fn name(&self) -> &str { &self.name }

    fn responds_to(&self, method: &str) -> bool {
        Self::METHODS.contains(&method)
    }

    fn invoke(&mut self, method: &str, args: Vec<Value>, env: &mut GameEnv<'_>) -> CoreResult<Value> {
        match method {
            "use" => {
                self.turning = !self.turning;
                Ok(json!(self.turning))
            }
            "turn" => {
                self.turning = arg_bool(method, &args, 0)?;
                Ok(json!(self.turning))
            }
            "attach_to" => {
                let variable = arg_str(method, &args, 0)?;
                let factor = arg_f64_or(method, &args, 1, 1.0)?;
                self.attach_to(variable, factor, env)?;
                Ok(Value::Null)
            }
            _ => Err(no_method(&self.name, method)),
        }
    }

    fn query(&self, method: &str, _args: &[Value], _state: &GameState) -> CoreResult<Value> {
        match method {
            "increment" if self.turning => Ok(json!(self.speed_incr)),
            "increment" => Ok(json!(-self.speed_decr)),
            _ => Err(no_method(&self.name, method)),
        }
    }

    fn install(&mut self, env: &mut GameEnv<'_>) -> CoreResult<()> {
        let speed = self.speed_var();
        env.state
            .make_variable(&speed, 0.0, Some(0.0), Some(self.speed_cap))
            .add_handler(Handler::Action(Action::caching(item_path(&self.name), "increment", Vec::new())));
        env.state
            .make_variable(&self.rotation_var(), 0.0, None, None)
            .add_handler(Handler::Action(make_variable_handler(&speed, 1.0)));
        Ok(())
    }

    fn on_remove(&mut self, env: &mut GameEnv<'_>) -> CoreResult<()> {
        let speed = self.speed_var();
        for attachment in self.attached.drain(..) {
            let handler = Handler::Action(make_variable_handler(&speed, attachment.factor));
            if let Some(var) = env.state.variables.get_mut(&attachment.variable) {
                var.remove_handler(&handler);
            }
        }
        Ok(())
    }

    fn variables(&self) -> Vec<String> {
        vec![self.speed_var(), self.rotation_var()]
    }

    fn as_any(&self) -> &dyn Any { self }
}

// ── Reactor ────────────────────────────────────────────────

/// Power climbs while active and falls otherwise. Attached variables receive
/// power minus consumption; the reactor shuts down once such a variable is
/// exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reactor {
    pub name: String,
    #[serde(flatten)]
    activity: Activity,
    #[serde(default)]
    attached: Vec<Attachment>,
}

impl Reactor {
    pub const KIND: &'static str = "Reactor";
    pub const POWER_CONSUMPTION: f64 = 10.0;
    pub const POWER_CLIMB: f64 = 1.0;
    pub const POWER_FALL: f64 = 3.0;
    pub const POWER_MAX: f64 = 20.0;
    const METHODS: &'static [&'static str] =
        &["use", "set_active", "attach_to", "check_energy", "power_rate", "energy_output"];

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), activity: Activity::default(), attached: Vec::new() }
    }

    pub fn power_var(&self) -> String {
        own_var(&self.name, "power")
    }

    fn output_handler(&self, factor: f64) -> Handler {
        Handler::Action(Action::caching(item_path(&self.name), "energy_output", vec![json!(factor)]))
    }

    fn exhaustion_handler(&self) -> LateHandler {
        LateHandler::Action(Action::caching(item_path(&self.name), "check_energy", Vec::new()))
    }

    /// Funnel power output, times `factor`, into `variable`.
    pub fn attach_to(&mut self, variable: &str, factor: f64, env: &mut GameEnv<'_>) -> CoreResult<()> {
        let output = self.output_handler(factor);
        let exhaustion = self.exhaustion_handler();
        let var = env.state.variable_mut(variable)?;
        var.add_handler(output);
        var.add_late_handler(exhaustion);
        self.attached.push(Attachment { variable: variable.to_string(), factor });
        Ok(())
    }
}

impl Item for Reactor {
    fn name(&self) -> &str { &self.name }

    fn activity(&self) -> Option<&Activity> { Some(&self.activity) }

    fn activity_mut(&mut self) -> Option<&mut Activity> { Some(&mut self.activity) }

    fn responds_to(&self, method: &str) -> bool {
        Self::METHODS.contains(&method) || LISTENER_METHODS.contains(&method)
    }

    fn invoke(&mut self, method: &str, args: Vec<Value>, env: &mut GameEnv<'_>) -> CoreResult<Value> {
        match method {
            "use" => {
                let on = !self.activity.active;
                Ok(json!(self.activity.set(&self.name, on, env)?))
            }
            "set_active" => {
                let on = arg_bool(method, &args, 0)?;
                Ok(json!(self.activity.set(&self.name, on, env)?))
            }
            "attach_to" => {
                let variable = arg_str(method, &args, 0)?;
                let factor = arg_f64_or(method, &args, 1, 1.0)?;
                self.attach_to(variable, factor, env)?;
                Ok(Value::Null)
            }
            "check_energy" => {
                let value = arg_f64(method, &args, 0)?;
                if value <= 0.0 && self.activity.active {
                    log::debug!("reactor '{}' shut down: energy exhausted", self.name);
                    self.activity.set(&self.name, false, env)?;
                }
                Ok(Value::Null)
            }
            _ => match self.activity.call(method, &args)? {
                Some(out) => Ok(out),
                None => Err(no_method(&self.name, method)),
            },
        }
    }

    fn query(&self, method: &str, args: &[Value], state: &GameState) -> CoreResult<Value> {
        match method {
            "power_rate" if self.activity.active => Ok(json!(Self::POWER_CLIMB)),
            "power_rate" => Ok(json!(-Self::POWER_FALL)),
            "energy_output" => {
                let factor = arg_f64_or(method, args, 0, 1.0)?;
                let mut output = state.variable(&self.power_var())?.value;
                if self.activity.active {
                    output -= Self::POWER_CONSUMPTION;
                }
                Ok(json!(output * factor))
            }
            _ => Err(no_method(&self.name, method)),
        }
    }

    fn install(&mut self, env: &mut GameEnv<'_>) -> CoreResult<()> {
        env.state
            .make_variable(&self.power_var(), 0.0, Some(0.0), Some(Self::POWER_MAX))
            .add_handler(Handler::Action(Action::caching(item_path(&self.name), "power_rate", Vec::new())));
        Ok(())
    }

    fn on_remove(&mut self, env: &mut GameEnv<'_>) -> CoreResult<()> {
        let exhaustion = self.exhaustion_handler();
        for attachment in std::mem::take(&mut self.attached) {
            let output = self.output_handler(attachment.factor);
            if let Some(var) = env.state.variables.get_mut(&attachment.variable) {
                var.remove_handler(&output);
                var.remove_late_handler(&exhaustion);
            }
        }
        Ok(())
    }

    fn variables(&self) -> Vec<String> {
        vec![self.power_var()]
    }

    fn as_any(&self) -> &dyn Any { self }
}

// ── Persistence and construction ───────────────────────────

macro_rules! persist_item {
    ($($ty:ty),* $(,)?) => {$(
        impl Persist for $ty {
            fn type_tag(&self) -> &'static str { <$ty>::KIND }

            fn save(&self) -> CoreResult<Value> {
                save_fields(self)
            }
        }
    )*};
}

persist_item!(Label, Button, Lighter, Crank, Reactor);

impl<E: ?Sized> Restore<E> for Label {
    const TAG: &'static str = Self::KIND;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }
}

impl<E: ?Sized> Restore<E> for Button {
    const TAG: &'static str = Self::KIND;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }
}

impl<E: ?Sized> Restore<E> for Lighter {
    const TAG: &'static str = Self::KIND;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }

    fn reinit(&mut self, _env: &E) {
        self.activity.reinit();
    }
}

impl<E: ?Sized> Restore<E> for Crank {
    const TAG: &'static str = Self::KIND;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }
}

impl<E: ?Sized> Restore<E> for Reactor {
    const TAG: &'static str = Self::KIND;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }

    fn reinit(&mut self, _env: &E) {
        self.activity.reinit();
    }
}

/// Construct an item from its kind and positional arguments:
///
///   Label   [text]
///   Button  [text, method, args...]
///   Lighter [capacity, fill?]
///   Crank   [speed_cap, speed_incr, speed_decr]
///   Reactor []
pub fn build(kind: &str, name: &str, args: &[Value]) -> CoreResult<Box<dyn Item>> {
    Ok(match kind {
        Label::KIND => Box::new(Label::new(name, arg_str("Label", args, 0)?)),
        Button::KIND => {
            let text = arg_str("Button", args, 0)?;
            let method = arg_str("Button", args, 1)?;
            Box::new(Button::new(name, text, method, args[2..].to_vec()))
        }
        Lighter::KIND => {
            let capacity = arg_f64("Lighter", args, 0)?;
            let fill = arg_f64_or("Lighter", args, 1, 0.0)?;
            Box::new(Lighter::new(name, capacity, fill))
        }
        Crank::KIND => Box::new(Crank::new(
            name,
            arg_f64("Crank", args, 0)?,
            arg_f64("Crank", args, 1)?,
            arg_f64("Crank", args, 2)?,
        )),
        Reactor::KIND => Box::new(Reactor::new(name)),
        other => return Err(CoreError::UnknownItemType { kind: other.to_string() }),
    })
}

//! Action routing — the explicit table Actions resolve against.
//!
//! TARGETS (an optional leading "game." is ignored):
//!   game                      session methods (messages, tabs, tasks, ...)
//!   state.flags               the FlagSet
//!   state.variables.<name>    one Variable
//!   state.items.<name>        one Item
//!
//! RULES:
//!   - Resolution checks the target exists and answers the method; it
//!     never calls anything.
//!   - GameEnv invokes (mutating). GameState evaluates (read-only), which is
//!     all a Variable rate handler may do.
//!   - An item is checked out of the state while its own method runs; a
//!     re-entrant call to it fails with ItemBusy.

use crate::{
    action::{arg_bool, arg_f64, arg_f64_or, arg_str, truthy, Action, Evaluate, Invoke, Resolve, CACHING_ACTION_TAG, ACTION_TAG},
    clock::TimeSource,
    error::{CoreError, CoreResult},
    event::UiEvent,
    flags::FlagDispatch,
    items::{self, Button, Crank, Item, Label, Lighter, Reactor},
    scheduler::{Scheduler, SchedulerEnv, Task},
    sequence::MessageSequence,
    serial::{restore_as, Registry, Restore},
    state::GameState,
    types::{Seconds, TaskId},
    variable::{notify_late, LateDispatch, RateSource, Variable},
};
use serde_json::{json, Map, Value};
use std::{any::Any, rc::Rc};

const FLAGS_PATH: &str = "state.flags";
const VARIABLES_PREFIX: &str = "state.variables.";
const ITEMS_PREFIX: &str = "state.items.";

/// Path an Action uses to reach the named item.
pub fn item_path(name: &str) -> String {
    format!("{ITEMS_PREFIX}{name}")
}

pub fn variable_path(name: &str) -> String {
    format!("{VARIABLES_PREFIX}{name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMethod {
    ShowMessage,
    AddTab,
    ShowTab,
    ShowItem,
    HideItem,
    ShowGauge,
    HideGauge,
    AddItem,
    RemoveItem,
    UseItem,
    AddTask,
    SetFlag,
    ClearFlag,
    Pause,
    UpdateVars,
    Save,
    Exit,
}

impl GameMethod {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "show_message" => Self::ShowMessage,
            "add_tab"      => Self::AddTab,
            "show_tab"     => Self::ShowTab,
            "show_item"    => Self::ShowItem,
            "hide_item"    => Self::HideItem,
            "show_gauge"   => Self::ShowGauge,
            "hide_gauge"   => Self::HideGauge,
            "add_item"     => Self::AddItem,
            "remove_item"  => Self::RemoveItem,
            "use_item"     => Self::UseItem,
            "add_task"     => Self::AddTask,
            "set_flag"     => Self::SetFlag,
            "clear_flag"   => Self::ClearFlag,
            "pause"        => Self::Pause,
            "update_vars"  => Self::UpdateVars,
            "save"         => Self::Save,
            "exit"         => Self::Exit,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMethod {
    Get,
    Set,
    Clear,
    Derive,
}

impl FlagMethod {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "get"    => Self::Get,
            "set"    => Self::Set,
            "clear"  => Self::Clear,
            "derive" => Self::Derive,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableMethod {
    GetValue,
    SetValue,
}

impl VariableMethod {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "get_value" => Self::GetValue,
            "set_value" => Self::SetValue,
            _ => return None,
        })
    }
}

/// A resolved Action target.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Game(GameMethod),
    Flags(FlagMethod),
    Variable { name: String, method: VariableMethod },
    Item { name: String, method: String },
}

fn unresolved_method(path: &str, method: &str) -> CoreError {
    CoreError::UnresolvedMethod { path: path.to_string(), method: method.to_string() }
}

fn resolve_route(state: &GameState, target_path: &str, method_name: &str) -> CoreResult<Route> {
    let path = target_path.strip_prefix("game.").unwrap_or(target_path);
    if path == "game" {
        return GameMethod::from_name(method_name)
            .map(Route::Game)
            .ok_or_else(|| unresolved_method(target_path, method_name));
    }
    if path == FLAGS_PATH {
        return FlagMethod::from_name(method_name)
            .map(Route::Flags)
            .ok_or_else(|| unresolved_method(target_path, method_name));
    }
    if let Some(name) = path.strip_prefix(VARIABLES_PREFIX) {
        if !state.variables.contains_key(name) {
            return Err(CoreError::UnresolvedTarget { path: target_path.to_string() });
        }
        let method = VariableMethod::from_name(method_name)
            .ok_or_else(|| unresolved_method(target_path, method_name))?;
        return Ok(Route::Variable { name: name.to_string(), method });
    }
    if let Some(name) = path.strip_prefix(ITEMS_PREFIX) {
        if state.is_busy(name) {
            return Err(CoreError::ItemBusy { name: name.to_string() });
        }
        let item = state
            .item(name)
            .ok_or_else(|| CoreError::UnresolvedTarget { path: target_path.to_string() })?;
        if !item.responds_to(method_name) {
            return Err(unresolved_method(target_path, method_name));
        }
        return Ok(Route::Item { name: name.to_string(), method: method_name.to_string() });
    }
    Err(CoreError::UnresolvedTarget { path: target_path.to_string() })
}

/// Build the caching Action for `method`, a path relative to the game
/// (`show_message`, `state.flags.set`, `state.items.lighter.use`).
pub fn create_task(method: &str, args: Vec<Value>) -> CoreResult<Action> {
    Ok(Action::from_path(&format!("game.{method}"), args)?.into_caching())
}

/// A rate handler that tracks another Variable's value times `factor`.
pub fn make_variable_handler(name: &str, factor: f64) -> Action {
    Action::caching(variable_path(name), "get_value", vec![json!(factor)])
}

impl Resolve for GameState {
    type Route = Route;

    fn resolve(&self, target_path: &str, method_name: &str) -> CoreResult<Route> {
        resolve_route(self, target_path, method_name)
    }
}

impl Evaluate for GameState {
    fn evaluate(&self, route: &Route, args: Vec<Value>) -> CoreResult<Value> {
        match route {
            Route::Variable { name, method: VariableMethod::GetValue } => {
                let factor = arg_f64_or("get_value", &args, 0, 1.0)?;
                Ok(json!(self.variable(name)?.get_value(Some(factor))))
            }
            Route::Flags(FlagMethod::Get) => {
                let name = arg_str("get", &args, 0)?;
                Ok(self.flags.get(name).map_or(Value::Null, Value::Bool))
            }
            Route::Item { name, method } => {
                let item = self.item(name).ok_or_else(|| match self.is_busy(name) {
                    true => CoreError::ItemBusy { name: name.clone() },
                    false => CoreError::UnresolvedTarget { path: format!("state.items.{name}") },
                })?;
                item.query(method, &args, self)
            }
            other => Err(CoreError::UnresolvedMethod {
                path:   format!("{other:?}"),
                method: "read-only evaluation".into(),
            }),
        }
    }
}

impl RateSource for GameState {
    fn rate(&self, action: &Action, _variable: &Variable) -> CoreResult<f64> {
        let out = action.eval(self, Vec::new())?;
        out.as_f64().ok_or_else(|| CoreError::NotANumber {
            path:  format!("{}.{}", action.target_path, action.method_name),
            found: out.to_string(),
        })
    }
}

/// Mutable view of a running game: the state plus its scheduler.
pub struct GameEnv<'a> {
    pub state: &'a mut GameState,
    pub sched: &'a mut Scheduler<GameState>,
}

impl<'a> GameEnv<'a> {
    pub fn new(state: &'a mut GameState, sched: &'a mut Scheduler<GameState>) -> Self {
        Self { state, sched }
    }

    pub fn now(&self) -> Seconds { self.sched.now() }

    pub fn get_flag(&self, name: &str) -> Option<bool> {
        self.state.flags.get(name)
    }

    /// Set a flag and run its handlers. Returns whether it changed.
    pub fn set_flag(&mut self, name: &str, value: bool) -> CoreResult<bool> {
        let change = self.state.flags.set(name, value)?;
        change.deliver(self)
    }

    pub fn derive_flag(&mut self, name: &str, op: &str, operands: &[&str]) -> CoreResult<bool> {
        let change = self.state.flags.derive(name, op, operands)?;
        change.deliver(self)
    }

    /// Schedule `method` (see create_task) `delay` seconds from now.
    pub fn add_task(&mut self, delay: Seconds, method: &str, args: Vec<Value>) -> CoreResult<TaskId> {
        let action = create_task(method, args)?;
        Ok(self.sched.add_task_in(Box::new(action), delay))
    }

    pub fn add_cont_task(&mut self, method: &str, args: Vec<Value>) -> CoreResult<TaskId> {
        let action = create_task(method, args)?;
        Ok(self.sched.add_cont_task(Box::new(action)))
    }

    /// Install and register an item, replacing any item of the same name.
    pub fn add_item(&mut self, mut item: Box<dyn Item>) -> CoreResult<()> {
        let name = item.name().to_string();
        if self.state.items.contains_key(&name) {
            self.remove_item(&name)?;
        }
        item.install(self)?;
        log::debug!("added item '{name}' ({})", item.type_tag());
        self.state.emit(UiEvent::ItemAdded { name: name.clone(), kind: item.type_tag().to_string() });
        self.state.items.insert(name, item);
        Ok(())
    }

    /// Remove an item from the game and from every tab. Returns whether it
    /// existed.
    pub fn remove_item(&mut self, name: &str) -> CoreResult<bool> {
        if self.state.is_busy(name) {
            if !self.state.retired.iter().any(|n| n == name) {
                self.state.retired.push(name.to_string());
            }
            self.forget_item(name);
            return Ok(true);
        }
        let Some(mut item) = self.state.items.remove(name) else {
            return Ok(false);
        };
        self.forget_item(name);
        item.on_remove(self)?;
        for var in item.variables() {
            self.state.variables.remove(&var);
        }
        Ok(true)
    }

    fn forget_item(&mut self, name: &str) {
        self.state.purge_from_tabs(name);
        self.state.emit(UiEvent::ItemRemoved { name: name.to_string() });
    }

    /// Call `method` on the named item.
    pub fn call_item(&mut self, name: &str, method: &str, args: Vec<Value>) -> CoreResult<Value> {
        if self.state.is_busy(name) {
            return Err(CoreError::ItemBusy { name: name.to_string() });
        }
        let mut item = self
            .state
            .items
            .remove(name)
            .ok_or_else(|| CoreError::UnknownItem { name: name.to_string() })?;
        self.state.busy.push(name.to_string());
        let result = item.invoke(method, args, self);
        self.state.busy.retain(|n| n != name);

        match self.state.retired.iter().position(|n| n == name) {
            Some(at) => {
                self.state.retired.remove(at);
                log::debug!("item '{name}' removed itself during '{method}'");
                item.on_remove(self)?;
                for var in item.variables() {
                    self.state.variables.remove(&var);
                }
            }
            None => {
                self.state.items.insert(name.to_string(), item);
            }
        }
        result
    }

    /// Pause the running game from inside a task.
    pub fn pause(&mut self) {
        if self.sched.clock().is_paused() {
            return;
        }
        log::info!("game paused at t={:.3}", self.sched.now());
        self.sched.stop();
        self.sched.clock_mut().pause();
        self.state.emit(UiEvent::PauseChanged { paused: true });
    }

    /// One housekeeping pass: stage every Variable from the pre-tick world,
    /// then commit each and run its late handlers.
    pub fn update_vars(&mut self) -> CoreResult<()> {
        let step = self.sched.step();
        let state: &GameState = self.state;
        let mut staged = Vec::with_capacity(state.variables.len());
        for (name, var) in &state.variables {
            staged.push((name.clone(), var.compute(step, state)?));
        }
        for (name, next) in &staged {
            if let Some(var) = self.state.variables.get_mut(name) {
                var.stage(*next);
            }
        }

        let mut first_err = None;
        for (name, _) in staged {
            // A late handler may have removed it.
            let Some(var) = self.state.variables.get_mut(&name) else {
                continue;
            };
            let result = match var.commit() {
                Ok(value) => {
                    let handlers = var.late_handlers().to_vec();
                    let mut late = LateCall { env: self, variable: &name };
                    notify_late(&handlers, value, &mut late)
                }
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                match first_err {
                    None => first_err = Some(err),
                    Some(_) => log::warn!("update of '{name}' failed: {err}"),
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn call_game(&mut self, method: GameMethod, args: Vec<Value>) -> CoreResult<Value> {
        use GameMethod::*;
        match method {
            ShowMessage => {
                let text = arg_str("show_message", &args, 0)?;
                self.state.show_message(text);
            }
            AddTab => {
                let name = arg_str("add_tab", &args, 0)?;
                let display = arg_str("add_tab", &args, 1)?;
                let hidden = args.get(2).is_some_and(truthy);
                self.state.add_tab(name, display, hidden);
            }
            ShowTab => {
                let name = arg_str("show_tab", &args, 0)?;
                let hidden = match args.get(1) {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(truthy(v)),
                };
                self.state.show_tab(name, hidden)?;
            }
            ShowItem | HideItem | ShowGauge | HideGauge => {
                let tab = arg_str("show_item", &args, 0)?;
                let name = arg_str("show_item", &args, 1)?;
                let show = match method {
                    ShowItem | ShowGauge => args.get(2).map_or(true, truthy),
                    _ => false,
                };
                if matches!(method, ShowItem | HideItem) {
                    self.state.show_item(tab, name, show)?;
                } else {
                    self.state.show_gauge(tab, name, show)?;
                }
            }
            AddItem => {
                let kind = arg_str("add_item", &args, 0)?;
                let name = arg_str("add_item", &args, 1)?;
                let item = items::build(kind, name, &args[2..])?;
                self.add_item(item)?;
            }
            RemoveItem => {
                let name = arg_str("remove_item", &args, 0)?;
                return Ok(json!(self.remove_item(name)?));
            }
            UseItem => {
                let name = arg_str("use_item", &args, 0)?.to_string();
                return self.call_item(&name, "use", Vec::new());
            }
            AddTask => {
                let delay = arg_f64("add_task", &args, 0)?;
                let target = arg_str("add_task", &args, 1)?.to_string();
                let id = self.add_task(delay, &target, args[2..].to_vec())?;
                return Ok(json!(id.raw()));
            }
            SetFlag | ClearFlag => {
                let name = arg_str("set_flag", &args, 0)?.to_string();
                return Ok(json!(self.set_flag(&name, method == SetFlag)?));
            }
            Pause => self.pause(),
            UpdateVars => self.update_vars()?,
            Save => self.state.requests.save = true,
            Exit => self.state.requests.exit = true,
        }
        Ok(Value::Null)
    }

    fn call_flags(&mut self, method: FlagMethod, args: Vec<Value>) -> CoreResult<Value> {
        match method {
            FlagMethod::Get => {
                let name = arg_str("get", &args, 0)?;
                Ok(self.get_flag(name).map_or(Value::Null, Value::Bool))
            }
            FlagMethod::Set => {
                let name = arg_str("set", &args, 0)?.to_string();
                let value = match args.get(1) {
                    None => true,
                    Some(_) => arg_bool("set", &args, 1)?,
                };
                Ok(json!(self.set_flag(&name, value)?))
            }
            FlagMethod::Clear => {
                let name = arg_str("clear", &args, 0)?.to_string();
                Ok(json!(self.set_flag(&name, false)?))
            }
            FlagMethod::Derive => {
                let name = arg_str("derive", &args, 0)?.to_string();
                let op = arg_str("derive", &args, 1)?.to_string();
                let operands = (2..args.len())
                    .map(|i| arg_str("derive", &args, i).map(str::to_string))
                    .collect::<CoreResult<Vec<String>>>()?;
                let refs: Vec<&str> = operands.iter().map(String::as_str).collect();
                Ok(json!(self.derive_flag(&name, &op, &refs)?))
            }
        }
    }

    fn call_variable(&mut self, name: &str, method: VariableMethod, args: Vec<Value>) -> CoreResult<Value> {
        match method {
            VariableMethod::GetValue => {
                let factor = arg_f64_or("get_value", &args, 0, 1.0)?;
                Ok(json!(self.state.variable(name)?.get_value(Some(factor))))
            }
            VariableMethod::SetValue => {
                let value = arg_f64("set_value", &args, 0)?;
                self.state.variable_mut(name)?.value = value;
                Ok(Value::Null)
            }
        }
    }
}

impl Resolve for GameEnv<'_> {
    type Route = Route;

    fn resolve(&self, target_path: &str, method_name: &str) -> CoreResult<Route> {
        resolve_route(self.state, target_path, method_name)
    }
}

impl Invoke for GameEnv<'_> {
    fn invoke(&mut self, route: &Route, args: Vec<Value>) -> CoreResult<Value> {
        match route {
            Route::Game(method) => self.call_game(*method, args),
            Route::Flags(method) => self.call_flags(*method, args),
            Route::Variable { name, method } => self.call_variable(name, *method, args),
            Route::Item { name, method } => self.call_item(name, method, args),
        }
    }
}

impl FlagDispatch for GameEnv<'_> {
    fn flag_changed(&mut self, action: &Action, name: &str, value: bool) -> CoreResult<()> {
        action.run(self, vec![json!(value), json!(name)])?;
        Ok(())
    }
}

/// Late handlers of one Variable receive `[value, variable-name]`.
struct LateCall<'e, 'a> {
    env:      &'e mut GameEnv<'a>,
    variable: &'e str,
}

impl LateDispatch for LateCall<'_, '_> {
    fn late(&mut self, action: &Action, value: f64) -> CoreResult<()> {
        action.run(self.env, vec![json!(value), json!(self.variable)])?;
        Ok(())
    }
}

/// Scheduled Actions. A continuous Action removes itself by returning a
/// truthy value.
impl Task<GameState> for Action {
    fn run(&mut self, _now: Seconds, state: &mut GameState, sched: &mut Scheduler<GameState>) -> CoreResult<bool> {
        let mut env = GameEnv::new(state, sched);
        let out = Action::run(self, &mut env, Vec::new())?;
        Ok(truthy(&out))
    }

    fn schedule_at(&mut self, time: Seconds) {
        self.time = Some(time);
    }

    fn due_time(&self) -> Option<Seconds> { self.time }

    fn as_any(&self) -> &dyn Any { self }
}

/// What deserialization needs: type registries and a time source for the
/// restored clock.
pub struct RestoreEnv {
    tasks: Registry<dyn Task<GameState>, RestoreEnv>,
    items: Registry<dyn Item, RestoreEnv>,
    time:  Rc<dyn TimeSource>,
}

fn restore_task<T>(body: Map<String, Value>, env: &RestoreEnv) -> CoreResult<Box<dyn Task<GameState>>>
where
    T: Task<GameState> + Restore<RestoreEnv> + 'static,
{
    let task: T = restore_as(body, env)?;
    Ok(Box::new(task))
}

fn restore_caching_action(body: Map<String, Value>, env: &RestoreEnv) -> CoreResult<Box<dyn Task<GameState>>> {
    let action: Action = restore_as(body, env)?;
    Ok(Box::new(action.into_caching()))
}

fn restore_item<T>(body: Map<String, Value>, env: &RestoreEnv) -> CoreResult<Box<dyn Item>>
where
    T: Item + Restore<RestoreEnv> + 'static,
{
    let item: T = restore_as(body, env)?;
    Ok(Box::new(item))
}

impl RestoreEnv {
    /// An environment knowing every built-in task and item type.
    pub fn standard(time: Rc<dyn TimeSource>) -> Self {
        let mut tasks: Registry<dyn Task<GameState>, RestoreEnv> = Registry::new();
        tasks.register(ACTION_TAG, restore_task::<Action>);
        tasks.register(CACHING_ACTION_TAG, restore_caching_action);
        tasks.register(MessageSequence::TAG_NAME, restore_task::<MessageSequence>);

        let mut items: Registry<dyn Item, RestoreEnv> = Registry::new();
        items.register(Label::KIND, restore_item::<Label>);
        items.register(Button::KIND, restore_item::<Button>);
        items.register(Lighter::KIND, restore_item::<Lighter>);
        items.register(Crank::KIND, restore_item::<Crank>);
        items.register(Reactor::KIND, restore_item::<Reactor>);

        Self { tasks, items, time }
    }

    pub fn register_task<T>(&mut self, tag: &'static str)
    where
        T: Task<GameState> + Restore<RestoreEnv> + 'static,
    {
        self.tasks.register(tag, restore_task::<T>);
    }

    pub fn register_item<T>(&mut self, tag: &'static str)
    where
        T: Item + Restore<RestoreEnv> + 'static,
    {
        self.items.register(tag, restore_item::<T>);
    }

    pub fn item_registry(&self) -> &Registry<dyn Item, RestoreEnv> { &self.items }

    pub fn time(&self) -> Rc<dyn TimeSource> { Rc::clone(&self.time) }
}

impl SchedulerEnv for RestoreEnv {
    type Ctx = GameState;

    fn task_registry(&self) -> &Registry<dyn Task<GameState>, RestoreEnv> { &self.tasks }

    fn time_source(&self) -> Rc<dyn TimeSource> { self.time() }
}

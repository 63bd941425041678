//! GameState — everything a saved game contains except the scheduler.
//!
//! RULES:
//!   - Variables and items are keyed by name; an item's own variables are
//!     named "<item>/<var>".
//!   - The outbox and the item checkout bookkeeping are transient.
//!   - Mutations that need the scheduler or must fire handlers go through
//!     GameEnv, not through these methods.

use crate::{
    env::RestoreEnv,
    error::{CoreError, CoreResult},
    event::UiEvent,
    flags::FlagSet,
    items::Item,
    serial::{restore_fields, restore_tagged, save_fields, to_tagged, Persist, Restore},
    variable::Variable,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{btree_map::Entry, BTreeMap};

pub const GAME_STATE_TAG: &str = "GameState";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    /// Display name.
    pub name:   String,
    #[serde(default)]
    pub items:  Vec<String>,
    #[serde(default)]
    pub gauges: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Requests raised from inside tasks that only the owning Game can honour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requests {
    pub save: bool,
    pub exit: bool,
}

#[derive(Default)]
pub struct GameState {
    pub flags:       FlagSet,
    pub variables:   BTreeMap<String, Variable>,
    pub(crate) items: BTreeMap<String, Box<dyn Item>>,
    pub messages:    Vec<String>,
    pub tabs:        BTreeMap<String, Tab>,
    pub tab_order:   Vec<String>,
    pub current_tab: Option<String>,
    pub misc:        Map<String, Value>,
    outbox:          Vec<UiEvent>,
    /// Items currently checked out for a call of their own.
    pub(crate) busy:     Vec<String>,
    /// Busy items removed while checked out; dropped on check-in.
    pub(crate) retired:  Vec<String>,
    pub(crate) requests: Requests,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: UiEvent) {
        log::trace!("ui event: {}", event.kind());
        self.outbox.push(event);
    }

    pub fn drain_events(&mut self) -> Vec<UiEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending_events(&self) -> &[UiEvent] { &self.outbox }

    pub fn requests(&self) -> Requests { self.requests }

    pub(crate) fn take_requests(&mut self) -> Requests {
        std::mem::take(&mut self.requests)
    }

    pub fn show_message(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.messages.push(text.clone());
        self.emit(UiEvent::MessageShown { text });
    }

    pub fn add_tab(&mut self, name: &str, display_name: &str, hidden: bool) {
        if !self.tab_order.iter().any(|t| t == name) {
            self.tab_order.push(name.to_string());
        }
        self.tabs.insert(
            name.to_string(),
            Tab { name: display_name.to_string(), hidden, ..Tab::default() },
        );
        self.emit(UiEvent::TabAdded {
            name:         name.to_string(),
            display_name: display_name.to_string(),
            hidden,
        });
    }

    pub fn show_tab(&mut self, name: &str, hidden: Option<bool>) -> CoreResult<()> {
        let tab = self.tab_mut(name)?;
        if let Some(hidden) = hidden {
            tab.hidden = hidden;
        }
        self.current_tab = Some(name.to_string());
        self.emit(UiEvent::TabShown { name: name.to_string() });
        Ok(())
    }

    fn tab_mut(&mut self, name: &str) -> CoreResult<&mut Tab> {
        self.tabs
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownTab { name: name.to_string() })
    }

    /// Show `item` in `tab` (moving it to the end), or hide it from there.
    pub fn show_item(&mut self, tab: &str, item: &str, show: bool) -> CoreResult<()> {
        let items = &mut self.tab_mut(tab)?.items;
        items.retain(|i| i != item);
        if show {
            items.push(item.to_string());
        }
        let (tab, item) = (tab.to_string(), item.to_string());
        self.emit(if show { UiEvent::ItemShown { tab, item } } else { UiEvent::ItemHidden { tab, item } });
        Ok(())
    }

    pub fn show_gauge(&mut self, tab: &str, gauge: &str, show: bool) -> CoreResult<()> {
        let gauges = &mut self.tab_mut(tab)?.gauges;
        gauges.retain(|g| g != gauge);
        if show {
            gauges.push(gauge.to_string());
        }
        let (tab, gauge) = (tab.to_string(), gauge.to_string());
        self.emit(if show { UiEvent::GaugeShown { tab, gauge } } else { UiEvent::GaugeHidden { tab, gauge } });
        Ok(())
    }

    /// Drop `name` from every tab's items and gauges.
    pub(crate) fn purge_from_tabs(&mut self, name: &str) {
        for tab in self.tabs.values_mut() {
            tab.items.retain(|i| i != name);
            tab.gauges.retain(|g| g != name);
        }
    }

    /// Create (or replace) a Variable.
    pub fn make_variable(&mut self, name: &str, value: f64, min: Option<f64>, max: Option<f64>) -> &mut Variable {
        let var = Variable::new(value, min, max);
        match self.variables.entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                slot.insert(var);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(var),
        }
    }

    pub fn variable(&self, name: &str) -> CoreResult<&Variable> {
        self.variables
            .get(name)
            .ok_or_else(|| CoreError::UnknownVariable { name: name.to_string() })
    }

    pub fn variable_mut(&mut self, name: &str) -> CoreResult<&mut Variable> {
        self.variables
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownVariable { name: name.to_string() })
    }

    /// None while the item is checked out for its own call.
    pub fn item(&self, name: &str) -> Option<&dyn Item> {
        self.items.get(name).map(|i| i.as_ref())
    }

    pub fn item_mut(&mut self, name: &str) -> Option<&mut (dyn Item + 'static)> {
        self.items.get_mut(name).map(|i| i.as_mut())
    }

    /// Typed access, for tests and tooling.
    pub fn item_as<T: 'static>(&self, name: &str) -> Option<&T> {
        self.item(name).and_then(|i| i.as_any().downcast_ref::<T>())
    }

    pub fn item_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.keys().map(String::as_str)
    }

    pub fn is_busy(&self, name: &str) -> bool {
        self.busy.iter().any(|n| n == name)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GameStateOut<'a> {
    flags:       Value,
    variables:   BTreeMap<&'a str, Value>,
    items:       BTreeMap<&'a str, Value>,
    messages:    &'a [String],
    tabs:        &'a BTreeMap<String, Tab>,
    tab_order:   &'a [String],
    current_tab: &'a Option<String>,
    misc:        &'a Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameStateIn {
    flags:       Value,
    #[serde(default)]
    variables:   BTreeMap<String, Value>,
    #[serde(default)]
    items:       BTreeMap<String, Value>,
    #[serde(default)]
    messages:    Vec<String>,
    #[serde(default)]
    tabs:        BTreeMap<String, Tab>,
    #[serde(default)]
    tab_order:   Vec<String>,
    #[serde(default)]
    current_tab: Option<String>,
    #[serde(default)]
    misc:        Map<String, Value>,
}

impl Persist for GameState {
    fn type_tag(&self) -> &'static str { GAME_STATE_TAG }

    fn save(&self) -> CoreResult<Value> {
        if let Some(name) = self.busy.first() {
            log::warn!("saving while item '{name}' is checked out; it will be missing");
        }
        let mut variables = BTreeMap::new();
        for (name, var) in &self.variables {
            variables.insert(name.as_str(), to_tagged(var)?);
        }
        let mut items = BTreeMap::new();
        for (name, item) in &self.items {
            items.insert(name.as_str(), to_tagged(item.as_ref())?);
        }
        save_fields(&GameStateOut {
            flags: to_tagged(&self.flags)?,
            variables,
            items,
            messages: &self.messages,
            tabs: &self.tabs,
            tab_order: &self.tab_order,
            current_tab: &self.current_tab,
            misc: &self.misc,
        })
    }
}

impl Restore<RestoreEnv> for GameState {
    const TAG: &'static str = GAME_STATE_TAG;

    fn restore(body: Map<String, Value>, env: &RestoreEnv) -> CoreResult<Self> {
        let repr: GameStateIn = restore_fields(body)?;
        let mut state = GameState::new();
        state.flags = restore_tagged(repr.flags, env)?;
        for (name, value) in repr.variables {
            let var: Variable = restore_tagged(value, env)?;
            state.variables.insert(name, var);
        }
        for (name, value) in repr.items {
            let item = env.item_registry().restore(value, env)?;
            state.items.insert(name, item);
        }
        state.messages = repr.messages;
        state.tabs = repr.tabs;
        state.tab_order = repr.tab_order;
        state.current_tab = repr.current_tab;
        state.misc = repr.misc;
        Ok(state)
    }
}

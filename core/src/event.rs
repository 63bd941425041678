//! UI events — everything a front end needs to mirror the game state.
//!
//! RULE: The core never renders. Operations that would touch the UI push a
//! UiEvent into the state's outbox; the host drains it after each tick.

use serde::{Deserialize, Serialize};

/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    MessageShown {
        text: String,
    },
    TabAdded {
        name:         String,
        display_name: String,
        hidden:       bool,
    },
    TabShown {
        name: String,
    },
    ItemShown {
        tab:  String,
        item: String,
    },
    ItemHidden {
        tab:  String,
        item: String,
    },
    GaugeShown {
        tab:   String,
        gauge: String,
    },
    GaugeHidden {
        tab:   String,
        gauge: String,
    },
    ItemAdded {
        name: String,
        kind: String,
    },
    ItemRemoved {
        name: String,
    },
    ActivityChanged {
        item:   String,
        active: bool,
    },
    PauseChanged {
        paused: bool,
    },
    Saved {
        bytes: usize,
    },
}

impl UiEvent {
    /// Stable snake_case name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UiEvent::MessageShown { .. }    => "message_shown",
            UiEvent::TabAdded { .. }        => "tab_added",
            UiEvent::TabShown { .. }        => "tab_shown",
            UiEvent::ItemShown { .. }       => "item_shown",
            UiEvent::ItemHidden { .. }      => "item_hidden",
            UiEvent::GaugeShown { .. }      => "gauge_shown",
            UiEvent::GaugeHidden { .. }     => "gauge_hidden",
            UiEvent::ItemAdded { .. }       => "item_added",
            UiEvent::ItemRemoved { .. }     => "item_removed",
            UiEvent::ActivityChanged { .. } => "activity_changed",
            UiEvent::PauseChanged { .. }    => "pause_changed",
            UiEvent::Saved { .. }           => "saved",
        }
    }
}

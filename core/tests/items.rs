//! Item tests.
//!
//! Covers: the lighter's fuel cycle, crank speed and rotation, reactor power
//! and shutdown, button scheduling and visibility, activity listeners, clean
//! removal (including an item removing itself mid-call), and failures inside
//! the variable pass.

use dasca_core::{
    action::Action,
    clock::ManualTime,
    config::GameConfig,
    engine::Game,
    error::CoreError,
    event::UiEvent,
    items::{Button, Crank, Item, Lighter, Reactor},
    variable::{Handler, LateHandler},
};
use serde_json::json;
use std::rc::Rc;

/// A game stepping one full second per tick.
fn build() -> (ManualTime, Game) {
    let time = ManualTime::new(0.0);
    let config = GameConfig { fps: 1.0, ..GameConfig::default_test() };
    let game = Game::new(config, Rc::new(time.clone())).expect("new game");
    (time, game)
}

fn ticks(time: &ManualTime, game: &mut Game, n: u32) {
    for _ in 0..n {
        time.advance(1.0);
        game.run_tick().expect("tick");
    }
}

fn value(game: &Game, var: &str) -> f64 {
    game.variable(var).unwrap_or_else(|e| panic!("{e}")).value
}

#[test]
fn lighter_burns_fuel_and_goes_out_when_empty() {
    let (time, mut game) = build();
    game.add_item(Box::new(Lighter::new("lighter", 2.0, 1.0))).unwrap();
    assert_eq!(value(&game, "lighter/fill"), 1.0);

    assert_eq!(game.use_item("lighter").unwrap(), json!(true), "lighting changes state");
    ticks(&time, &mut game, 1);
    assert_eq!(value(&game, "lighter/fill"), 0.5, "burns 0.5 per second while lit");
    assert!(game.state().item("lighter").unwrap().is_active());

    ticks(&time, &mut game, 1);
    assert_eq!(value(&game, "lighter/fill"), 0.0);
    assert!(!game.state().item("lighter").unwrap().is_active(), "an empty lighter goes out");

    ticks(&time, &mut game, 2);
    assert_eq!(value(&game, "lighter/fill"), 0.0, "an unlit lighter burns nothing");
    assert!(game.failures().is_empty(), "failures: {:?}", game.failures());
}

#[test]
fn an_empty_lighter_refuses_to_light_until_refilled() {
    let (time, mut game) = build();
    game.add_item(Box::new(Lighter::new("lighter", 2.0, 0.0))).unwrap();

    assert_eq!(game.use_item("lighter").unwrap(), json!(false));
    assert!(!game.state().item("lighter").unwrap().is_active());
    assert_eq!(game.state().messages, vec!["The lighter is burnt out."]);

    let filled = game.call_item("lighter", "refill", vec![json!(5.0)]).unwrap();
    assert_eq!(filled, json!(2.0), "refills stop at capacity");
    assert_eq!(game.use_item("lighter").unwrap(), json!(true));
    ticks(&time, &mut game, 1);
    assert_eq!(value(&game, "lighter/fill"), 1.5);
}

#[test]
fn item_handlers_keep_their_resolved_routes_across_ticks() {
    let (time, mut game) = build();
    game.add_item(Box::new(Lighter::new("lighter", 2.0, 1.0))).unwrap();
    ticks(&time, &mut game, 1);

    let fill = game.variable("lighter/fill").unwrap();
    match fill.late_handlers() {
        [LateHandler::Action(check)] => assert!(check.is_resolved(), "the stored handler was warmed by its run"),
        other => panic!("unexpected late handlers: {other:?}"),
    }
}

#[test]
fn crank_speed_rises_while_turning_and_rotation_integrates_it() {
    let (time, mut game) = build();
    game.add_item(Box::new(Crank::new("crank", 5.0, 2.0, 1.0))).unwrap();
    assert_eq!(game.use_item("crank").unwrap(), json!(true), "use toggles turning on");

    ticks(&time, &mut game, 3);
    assert_eq!(value(&game, "crank/speed"), 5.0, "2, 4, then capped at 5");
    // Rotation sees the pre-tick speed: 0 + 2 + 4.
    assert_eq!(value(&game, "crank/rotation"), 6.0);

    game.call_item("crank", "turn", vec![json!(false)]).unwrap();
    ticks(&time, &mut game, 2);
    assert_eq!(value(&game, "crank/speed"), 3.0, "decays by 1 per second");
    assert_eq!(value(&game, "crank/rotation"), 15.0);
    assert!(!game.state().item_as::<Crank>("crank").unwrap().is_turning());
}

#[test]
fn an_attached_crank_feeds_the_target_and_detaches_on_removal() {
    let (time, mut game) = build();
    game.make_variable("energy", 0.0, Some(0.0), Some(100.0));
    game.add_item(Box::new(Crank::new("crank", 4.0, 4.0, 1.0))).unwrap();
    game.call_item("crank", "attach_to", vec![json!("energy"), json!(0.5)]).unwrap();
    game.call_item("crank", "turn", vec![json!(true)]).unwrap();

    ticks(&time, &mut game, 3);
    // Energy sees speeds 0, 4, 4 at half strength.
    assert_eq!(value(&game, "energy"), 4.0);
    assert_eq!(game.state().item_as::<Crank>("crank").unwrap().attached().len(), 1);

    assert!(game.remove_item("crank").unwrap());
    assert!(game.variable("energy").unwrap().handlers().is_empty(), "the feed is detached");
    assert!(matches!(game.variable("crank/speed"), Err(CoreError::UnknownVariable { .. })));
    assert!(matches!(game.variable("crank/rotation"), Err(CoreError::UnknownVariable { .. })));

    ticks(&time, &mut game, 2);
    assert_eq!(value(&game, "energy"), 4.0);
    assert!(game.failures().is_empty(), "failures: {:?}", game.failures());
    assert!(!game.remove_item("crank").unwrap(), "second removal reports absence");
}

#[test]
fn reactor_power_climbs_while_active_and_falls_otherwise() {
    let (time, mut game) = build();
    game.add_item(Box::new(Reactor::new("reactor"))).unwrap();
    game.use_item("reactor").unwrap();

    ticks(&time, &mut game, 5);
    assert_eq!(value(&game, "reactor/power"), 5.0);

    game.call_item("reactor", "set_active", vec![json!(false)]).unwrap();
    ticks(&time, &mut game, 1);
    assert_eq!(value(&game, "reactor/power"), 2.0);
    ticks(&time, &mut game, 1);
    assert_eq!(value(&game, "reactor/power"), 0.0, "power never goes negative");
}

#[test]
fn reactor_drains_attached_energy_and_shuts_down_when_it_runs_out() {
    let (time, mut game) = build();
    game.make_variable("energy", 25.0, Some(0.0), Some(100.0));
    game.add_item(Box::new(Reactor::new("reactor"))).unwrap();
    game.call_item("reactor", "attach_to", vec![json!("energy")]).unwrap();
    game.use_item("reactor").unwrap();

    // Output is power - 10 while active: -10, -9.
    ticks(&time, &mut game, 2);
    assert_eq!(value(&game, "energy"), 6.0);
    assert!(game.state().item("reactor").unwrap().is_active());

    ticks(&time, &mut game, 1);
    assert_eq!(value(&game, "energy"), 0.0);
    assert!(!game.state().item("reactor").unwrap().is_active(), "exhausted energy shuts it down");

    let changes: Vec<bool> = game
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            UiEvent::ActivityChanged { active, .. } => Some(active),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![true, false]);
    assert!(game.failures().is_empty(), "failures: {:?}", game.failures());
}

#[test]
fn a_button_schedules_its_method_after_the_delay() {
    let time = ManualTime::new(0.0);
    let mut game = Game::new(GameConfig::default_test(), Rc::new(time.clone())).unwrap();
    let button = Button::new("strike", "Strike", "show_message", vec![json!("struck")]).with_delay(0.5);
    game.add_item(Box::new(button)).unwrap();

    game.use_item("strike").unwrap();
    time.advance(0.3);
    game.run_tick().unwrap();
    assert!(game.state().messages.is_empty(), "not before the delay");

    time.advance(0.3);
    game.run_tick().unwrap();
    assert_eq!(game.state().messages, vec!["struck"]);
}

#[test]
fn a_button_follows_its_anchor_and_lets_go_when_removed() {
    let (_time, mut game) = build();
    game.add_tab("main", "Room", false);
    game.add_item(Box::new(Lighter::new("lamp", 5.0, 5.0))).unwrap();
    game.add_item(Box::new(Button::new("snuff", "Snuff", "state.items.lamp.set_active", vec![json!(false)])))
        .unwrap();
    game.call_item("snuff", "show_when_active", vec![json!("main"), json!("lamp")]).unwrap();

    let shown = |game: &Game| game.state().tabs["main"].items.contains(&"snuff".to_string());
    assert!(!shown(&game), "hidden while the lamp is out");
    game.use_item("lamp").unwrap();
    assert!(shown(&game), "shown once the lamp is lit");
    game.use_item("lamp").unwrap();
    assert!(!shown(&game));

    assert_eq!(game.state().item_as::<Button>("snuff").unwrap().anchor(), Some("lamp"));
    game.remove_item("snuff").unwrap();
    let lamp = game.state().item("lamp").unwrap();
    assert!(lamp.activity().unwrap().listeners.is_empty(), "removal detaches the listener");
    assert_eq!(game.use_item("lamp").unwrap(), json!(true), "the lamp works without its follower");
}

#[test]
fn listeners_receive_the_new_state_and_can_be_removed() {
    let (_time, mut game) = build();
    game.add_item(Box::new(Lighter::new("lamp", 5.0, 5.0))).unwrap();
    game.call_item("lamp", "add_listener", vec![json!("show_message"), json!("lamp flicker")]).unwrap();
    game.call_item("lamp", "bind_flag", vec![json!("lit")]).unwrap();

    game.use_item("lamp").unwrap();
    assert_eq!(game.state().messages, vec!["lamp flicker"]);
    assert_eq!(game.get_flag("lit"), Some(true));

    let removed = game.call_item("lamp", "remove_listener_for", vec![json!("show_message")]).unwrap();
    assert_eq!(removed, json!(true));
    game.use_item("lamp").unwrap();
    assert_eq!(game.state().messages.len(), 1, "the removed listener stays quiet");
    assert_eq!(game.get_flag("lit"), Some(false), "the bound flag still follows");
}

#[test]
fn an_item_can_remove_itself_during_its_own_call() {
    let (time, mut game) = build();
    game.add_tab("main", "Room", false);
    game.add_item(Box::new(Lighter::new("match", 1.0, 1.0))).unwrap();
    game.show_item("main", "match").unwrap();
    game.call_item("match", "add_listener", vec![json!("remove_item"), json!("match")]).unwrap();

    game.use_item("match").unwrap();
    assert!(game.state().item("match").is_none());
    assert!(!game.state().is_busy("match"));
    assert!(game.state().tabs["main"].items.is_empty(), "purged from tabs");
    assert!(matches!(game.variable("match/fill"), Err(CoreError::UnknownVariable { .. })));

    ticks(&time, &mut game, 1);
    assert!(game.failures().is_empty(), "failures: {:?}", game.failures());
}

#[test]
fn reading_a_removed_item_reports_the_missing_target() {
    let (time, mut game) = build();
    game.add_item(Box::new(Crank::new("crank", 5.0, 2.0, 1.0))).unwrap();
    game.make_variable("wind", 10.0, None, None)
        .add_handler(Handler::Action(Action::caching("state.items.crank", "increment", vec![])));
    ticks(&time, &mut game, 1);
    assert_eq!(value(&game, "wind"), 9.0, "an idle crank decays");

    game.remove_item("crank").unwrap();
    ticks(&time, &mut game, 1);
    let failures = game.take_failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("Cannot resolve target"), "absent, not busy: {}", failures[0]);
    assert!(!failures[0].contains("busy"), "{}", failures[0]);
}

#[test]
fn a_failed_commit_does_not_stop_the_rest_of_the_pass() {
    let (time, mut game) = build();
    game.add_item(Box::new(Lighter::new("lamp", 5.0, 5.0))).unwrap();
    // Re-adding the lamp mid-pass swaps in a fresh, unstaged fill variable.
    let rebuild = game
        .create_task("add_item", vec![json!("Lighter"), json!("lamp"), json!(5.0), json!(5.0)])
        .unwrap();
    game.make_variable("a", 0.0, None, None).add_late_handler(LateHandler::Action(rebuild));
    game.make_variable("z", 0.0, None, None).add_handler(Handler::Rate(1.0));

    ticks(&time, &mut game, 1);
    assert_eq!(value(&game, "z"), 1.0, "variables after the failure still commit");
    let failures = game.take_failures();
    assert_eq!(failures.len(), 1, "failures: {failures:?}");
    assert!(failures[0].contains("No pending update"), "{}", failures[0]);
}

#[test]
fn reentrant_calls_are_refused() {
    let (_time, mut game) = build();
    game.add_item(Box::new(Lighter::new("lamp", 5.0, 5.0))).unwrap();
    game.call_item("lamp", "add_listener", vec![json!("state.items.lamp.use")]).unwrap();

    let err = game.use_item("lamp").unwrap_err();
    assert!(matches!(err, CoreError::ItemBusy { .. }), "got {err:?}");
    assert!(!game.state().is_busy("lamp"), "the item is checked back in");
}

#[test]
fn items_can_be_added_by_kind_from_a_task() {
    let (time, mut game) = build();
    game.add_task(0.0, "add_item", vec![json!("Crank"), json!("winch"), json!(3.0), json!(1.0), json!(1.0)])
        .unwrap();
    game.add_task(0.0, "add_item", vec![json!("Gizmo"), json!("odd")]).unwrap();
    ticks(&time, &mut game, 1);

    let winch = game.state().item_as::<Crank>("winch").expect("built from its kind");
    assert_eq!(winch.speed_cap, 3.0);
    assert!(game.variable("winch/speed").is_ok());
    let failures = game.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("Gizmo"), "unknown kinds fail the task: {}", failures[0]);
}

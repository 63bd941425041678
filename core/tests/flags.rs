//! FlagSet tests.
//!
//! Covers: AND/OR derivation, cascades through chains of derived flags,
//! late-handler delivery, rejected assignments and cycles, and flag
//! handlers reached through Actions on a live game.

use dasca_core::{
    action::Action,
    clock::ManualTime,
    config::GameConfig,
    engine::Game,
    error::{CoreError, CoreResult},
    flags::{FlagDispatch, FlagHandler, FlagSet},
};
use serde_json::json;
use std::{cell::RefCell, rc::Rc};

/// Dispatch for sets carrying only native handlers.
struct NativeOnly;

impl FlagDispatch for NativeOnly {
    fn flag_changed(&mut self, action: &Action, _name: &str, _value: bool) -> CoreResult<()> {
        Err(CoreError::UnresolvedTarget { path: action.target_path.clone() })
    }
}

type Calls = Rc<RefCell<Vec<(String, bool)>>>;

fn recorder(flags: &mut FlagSet, name: &str) -> Calls {
    let calls: Calls = Rc::default();
    let sink = Rc::clone(&calls);
    flags.add_late_handler(
        name,
        FlagHandler::native(format!("record-{name}"), move |n, v| sink.borrow_mut().push((n.to_string(), v))),
    );
    calls
}

fn set(flags: &mut FlagSet, name: &str, value: bool) -> bool {
    flags.set(name, value).expect("set").deliver(&mut NativeOnly).expect("deliver")
}

#[test]
fn and_derivation_follows_its_operands_and_fires_once() {
    let mut flags = FlagSet::new();
    set(&mut flags, "a", true);
    set(&mut flags, "b", false);
    flags.derive("ready", "and", &["a", "b"]).unwrap().deliver(&mut NativeOnly).unwrap();
    assert_eq!(flags.get("ready"), Some(false));

    let calls = recorder(&mut flags, "ready");
    set(&mut flags, "b", true);
    assert_eq!(flags.get("ready"), Some(true));
    assert_eq!(*calls.borrow(), vec![("ready".to_string(), true)], "exactly one notification");

    set(&mut flags, "b", true);
    assert_eq!(calls.borrow().len(), 1, "re-setting the same value is silent");
}

#[test]
fn or_derivation_is_set_while_any_operand_is() {
    let mut flags = FlagSet::new();
    flags.derive("any", "or", &["x", "y"]).unwrap().deliver(&mut NativeOnly).unwrap();
    assert_eq!(flags.get("any"), Some(false), "unset operands read as false");

    set(&mut flags, "x", true);
    assert!(flags.is_set("any"));
    set(&mut flags, "y", true);
    set(&mut flags, "x", false);
    assert!(flags.is_set("any"), "y still holds it up");
    set(&mut flags, "y", false);
    assert!(!flags.is_set("any"));
}

#[test]
fn changes_cascade_through_chains_before_handlers_run() {
    let mut flags = FlagSet::new();
    flags.derive("mid", "and", &["a", "b"]).unwrap().deliver(&mut NativeOnly).unwrap();
    flags.derive("top", "or", &["mid", "c"]).unwrap().deliver(&mut NativeOnly).unwrap();
    set(&mut flags, "a", true);

    let top_calls = recorder(&mut flags, "top");
    let b_calls = recorder(&mut flags, "b");
    let change = flags.set("b", true).unwrap();
    assert!(change.changed);
    assert_eq!(flags.get("top"), Some(true), "cascade completes inside set()");
    assert!(top_calls.borrow().is_empty(), "handlers wait for delivery");

    change.deliver(&mut NativeOnly).unwrap();
    assert_eq!(top_calls.borrow().len(), 1);
    assert_eq!(b_calls.borrow().len(), 1);
}

#[test]
fn repeated_operands_count_once() {
    let mut flags = FlagSet::new();
    flags.derive("both", "and", &["a", "a"]).unwrap().deliver(&mut NativeOnly).unwrap();
    let calls = recorder(&mut flags, "both");
    set(&mut flags, "a", true);
    assert!(flags.is_set("both"));
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn redefining_a_derivation_notifies_again() {
    let mut flags = FlagSet::new();
    let calls = recorder(&mut flags, "ready");

    flags.derive("ready", "and", &["a"]).unwrap().deliver(&mut NativeOnly).unwrap();
    flags.derive("ready", "or", &["a", "b"]).unwrap().deliver(&mut NativeOnly).unwrap();
    assert_eq!(flags.get("ready"), Some(false));
    assert_eq!(
        *calls.borrow(),
        vec![("ready".to_string(), false), ("ready".to_string(), false)],
        "each derive announces its value even when unchanged"
    );
}

#[test]
fn derived_flags_cannot_be_assigned() {
    let mut flags = FlagSet::new();
    flags.derive("d", "or", &["a"]).unwrap().deliver(&mut NativeOnly).unwrap();
    let err = flags.set("d", true).unwrap_err();
    assert!(matches!(err, CoreError::DerivedFlagAssignment { .. }), "got {err:?}");
}

#[test]
fn unknown_operators_and_cycles_are_rejected() {
    let mut flags = FlagSet::new();
    assert!(matches!(flags.derive("d", "xor", &["a"]), Err(CoreError::UnknownOperator { .. })));

    flags.derive("p", "and", &["q"]).unwrap().deliver(&mut NativeOnly).unwrap();
    assert!(matches!(flags.derive("q", "or", &["p"]), Err(CoreError::DerivationCycle { .. })));
    assert!(matches!(flags.derive("s", "or", &["s"]), Err(CoreError::DerivationCycle { .. })));
    assert!(!flags.is_derived("q"), "a rejected derivation leaves no trace");
}

#[test]
fn action_handlers_reach_the_game() {
    let time = ManualTime::new(0.0);
    let mut game = Game::new(GameConfig::default_test(), Rc::new(time)).unwrap();
    game.derive_flag("ready", "and", &["a", "b"]).unwrap();
    let handler = game.create_task("show_message", vec![json!("ready changed")]).unwrap();
    game.state_mut().flags.add_late_handler("ready", FlagHandler::Action(handler));

    game.set_flag("a").unwrap();
    assert!(game.state().messages.is_empty());
    assert!(game.set_flag("b").unwrap(), "b changed");
    assert_eq!(game.get_flag("ready"), Some(true));
    assert_eq!(game.state().messages, vec!["ready changed"]);

    assert!(game.clear_flag("a").unwrap());
    assert_eq!(game.state().messages.len(), 2, "clearing fires the handler again");

    match game.state().flags.late_handlers("ready") {
        [FlagHandler::Action(stored)] => assert!(stored.is_resolved(), "delivery warms the stored handler"),
        other => panic!("unexpected handlers: {other:?}"),
    }
}

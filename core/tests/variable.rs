//! Variable tests.
//!
//! Covers: two-phase isolation across Variables, clamping, modulo, handler
//! kinds, late handlers, and the refusal to persist native callbacks.

use dasca_core::{
    clock::ManualTime,
    config::GameConfig,
    engine::Game,
    error::CoreError,
    serial::to_tagged,
    variable::{Detached, Handler, LateHandler, Variable},
};
use std::{cell::RefCell, rc::Rc};

/// A game stepping one full second per tick.
fn one_second_game() -> (ManualTime, Game) {
    let time = ManualTime::new(0.0);
    let config = GameConfig { fps: 1.0, ..GameConfig::default_test() };
    let game = Game::new(config, Rc::new(time.clone())).expect("new game");
    (time, game)
}

fn tick(var: &mut Variable, step: f64) -> f64 {
    var.update(step, &Detached).expect("update");
    var.commit().expect("commit")
}

#[test]
fn handlers_see_the_pre_tick_value_of_other_variables() {
    let (time, mut game) = one_second_game();
    let a_handler = game.make_variable_handler("b", 1.0);
    let b_handler = game.make_variable_handler("a", 1.0);
    game.make_variable("a", 10.0, None, None).add_handler(Handler::Action(a_handler));
    game.make_variable("b", 5.0, None, None).add_handler(Handler::Action(b_handler));

    time.advance(1.0);
    game.run_tick().expect("tick");

    let a = game.variable("a").unwrap().value;
    let b = game.variable("b").unwrap().value;
    assert_eq!((a, b), (15.0, 15.0), "each must read the other's pre-update value");
    assert!(game.failures().is_empty(), "unexpected failures: {:?}", game.failures());
}

#[test]
fn clamping_stops_exactly_at_the_bound() {
    let mut var = Variable::new(5.0, Some(0.0), Some(10.0));
    var.add_handler(Handler::Rate(-100.0));
    assert_eq!(tick(&mut var, 1.0), 0.0, "must converge to min, never below");

    let mut var = Variable::new(5.0, Some(0.0), Some(10.0));
    var.add_handler(Handler::Rate(100.0));
    assert_eq!(tick(&mut var, 0.1), 10.0, "must stop at max");
}

#[test]
fn modulo_reduces_before_clamping() {
    let mut var = Variable::new(350.0, None, Some(300.0)).with_mod(360.0);
    var.add_handler(Handler::Rate(20.0));
    // 370 % 360 = 10, which is under the max.
    assert_eq!(tick(&mut var, 1.0), 10.0);
}

#[test]
fn rates_of_all_handlers_sum_over_the_step() {
    let mut var = Variable::new(1.0, None, None);
    var.add_handler(Handler::Rate(2.0));
    var.add_handler(Handler::Rate(3.0));
    var.add_handler(Handler::native("self-doubling", |v| v.value));
    // 1 + (2 + 3 + 1) * 0.5
    assert_eq!(tick(&mut var, 0.5), 4.0);
}

#[test]
fn update_stages_without_touching_the_value() {
    let mut var = Variable::new(1.0, None, None);
    var.add_handler(Handler::Rate(1.0));
    var.update(1.0, &Detached).unwrap();
    assert_eq!(var.value, 1.0, "phase one must not commit");
    assert_eq!(var.pending(), Some(2.0));
    assert_eq!(var.commit().unwrap(), 2.0);
    assert_eq!(var.pending(), None);
}

#[test]
fn commit_without_a_pending_update_fails() {
    let mut var = Variable::new(1.0, None, None);
    assert!(matches!(var.commit(), Err(CoreError::NoPendingUpdate)));
}

#[test]
fn late_handlers_receive_the_committed_value() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let mut var = Variable::new(0.0, None, None);
    var.add_handler(Handler::Rate(4.0));
    var.add_late_handler(LateHandler::native("record", move |v| sink.borrow_mut().push(v)));

    var.update(0.25, &Detached).unwrap();
    var.update_late(&mut Detached).unwrap();
    var.update(0.25, &Detached).unwrap();
    var.update_late(&mut Detached).unwrap();

    assert_eq!(*seen.borrow(), vec![1.0, 2.0]);
}

#[test]
fn action_handlers_need_a_world_to_resolve_against() {
    let (_time, game) = one_second_game();
    let mut var = Variable::new(0.0, None, None);
    var.add_handler(Handler::Action(game.make_variable_handler("elsewhere", 1.0)));
    let err = var.update(1.0, &Detached).unwrap_err();
    assert!(matches!(err, CoreError::UnresolvedTarget { .. }), "got {err:?}");
}

#[test]
fn handlers_are_removed_by_equality() {
    let mut var = Variable::new(0.0, None, None);
    let native = Handler::native("n", |_| 1.0);
    var.add_handler(Handler::Rate(1.0));
    var.add_handler(native.clone());

    assert!(var.remove_handler(&native), "a clone of a native is the same handler");
    assert!(!var.remove_handler(&Handler::native("n", |_| 1.0)), "a new closure is not");
    assert!(var.remove_handler(&Handler::Rate(1.0)));
    assert!(var.handlers().is_empty());
}

#[test]
fn native_callbacks_refuse_to_persist() {
    let mut var = Variable::new(0.0, None, None);
    var.add_late_handler(LateHandler::native("ui-refresh", |_| {}));
    match to_tagged(&var) {
        Err(CoreError::Unserializable { name }) => assert_eq!(name, "ui-refresh"),
        other => panic!("expected Unserializable, got {other:?}"),
    }

    let mut var = Variable::new(0.0, None, None);
    var.add_handler(Handler::Rate(1.5));
    let saved = to_tagged(&var).expect("rate handlers persist");
    assert_eq!(saved["__type__"], "Variable");
    assert_eq!(saved["handlers"][0]["rate"], 1.5);
}

#[test]
fn get_value_scales_by_the_factor() {
    let var = Variable::new(4.0, None, None);
    assert_eq!(var.get_value(None), 4.0);
    assert_eq!(var.get_value(Some(0.5)), 2.0);
}

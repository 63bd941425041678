//! Game session tests.
//!
//! Covers: the requeue-driven tick loop, pausing, task failure policy,
//! save/exit requests raised by tasks, storage-backed load_or_new, and the
//! UI event outbox.

use dasca_core::{
    clock::ManualTime,
    config::GameConfig,
    engine::Game,
    error::CoreError,
    event::UiEvent,
    sequence::{MessageSequence, Step},
    store::{KvStore, MemoryStore, StorageCell},
};
use serde_json::json;
use std::{cell::Cell, rc::Rc};

/// A game plus the manual clock and requeue flag a host would hold.
struct Host {
    time:   ManualTime,
    game:   Game,
    queued: Rc<Cell<bool>>,
}

impl Host {
    fn new(config: GameConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let time = ManualTime::new(0.0);
        let game = Game::new(config, Rc::new(time.clone())).expect("new game");
        Self::wrap(time, game)
    }

    fn wrap(time: ManualTime, mut game: Game) -> Self {
        let queued = Rc::new(Cell::new(false));
        let flag = Rc::clone(&queued);
        game.set_requeue(move || flag.set(true));
        game.start();
        Self { time, game, queued }
    }

    /// Advance virtual time tick by tick; returns the number of ticks run.
    fn advance(&mut self, seconds: f64) -> u32 {
        let step = 1.0 / self.game.config().fps;
        let mut ran = 0;
        for _ in 0..(seconds / step).round() as u32 {
            self.time.advance(step);
            if self.queued.replace(false) && self.game.poll().expect("poll") {
                ran += 1;
            }
        }
        ran
    }
}

#[test]
fn a_new_game_ticks_continuously_through_its_housekeeping_task() {
    let mut host = Host::new(GameConfig::default_test());
    assert_eq!(host.game.scheduler().continuous_tasks().count(), 1);
    assert!(host.queued.get(), "starting a game with work queues the first tick");

    let ran = host.advance(1.0);
    assert_eq!(ran, 10, "one tick per step at 10 fps");
    assert_eq!(host.game.scheduler().ticks(), 10);
}

#[test]
fn variables_advance_one_step_per_tick() {
    let mut host = Host::new(GameConfig::default_test());
    host.game.make_variable("heat", 0.0, None, None).add_handler(dasca_core::variable::Handler::Rate(2.0));
    host.advance(1.0);
    let heat = host.game.variable("heat").unwrap().value;
    assert!((heat - 2.0).abs() < 1e-9, "ten steps of 0.1s at 2/s: heat = {heat}");
}

#[test]
fn pausing_freezes_time_without_losing_tasks() {
    let mut host = Host::new(GameConfig::default_test());
    host.game.add_task(1.0, "show_message", vec![json!("tick tock")]).unwrap();
    host.advance(0.5);

    assert!(host.game.pause(Some(true)));
    let frozen = host.game.now();
    assert_eq!(host.advance(10.0), 0, "a paused game runs no ticks");
    assert_eq!(host.game.now(), frozen, "virtual time stands still");
    assert!(host.game.state().messages.is_empty());

    assert!(!host.game.toggle_pause());
    host.advance(0.4);
    assert!(host.game.state().messages.is_empty(), "0.9s of virtual time so far");
    host.advance(0.2);
    assert_eq!(host.game.state().messages, vec!["tick tock"]);

    let pauses: Vec<bool> = host
        .game
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            UiEvent::PauseChanged { paused } => Some(paused),
            _ => None,
        })
        .collect();
    assert_eq!(pauses, vec![true, false]);
}

#[test]
fn the_pause_method_pauses_from_inside_a_task() {
    let mut host = Host::new(GameConfig::default_test());
    host.game.add_task(0.2, "pause", vec![]).unwrap();
    host.advance(1.0);
    assert!(host.game.is_paused());
    assert!(!host.game.scheduler().is_running());
}

#[test]
fn a_failing_task_halts_the_game_when_configured() {
    let config = GameConfig { halt_on_task_error: true, ..GameConfig::default_test() };
    let mut host = Host::new(config);
    host.game.add_task(0.0, "state.items.ghost.use", vec![]).unwrap();
    host.game.add_task(0.0, "show_message", vec![json!("same tick")]).unwrap();

    host.advance(1.0);
    assert!(!host.game.scheduler().is_running(), "halt_on_task_error stops the scheduler");
    assert_eq!(host.game.state().messages, vec!["same tick"], "the rest of the tick still ran");
    assert_eq!(host.game.scheduler().ticks(), 1);
    let failures = host.game.take_failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("ghost"), "failure names the target: {}", failures[0]);
}

#[test]
fn a_failing_task_is_only_recorded_when_not_halting() {
    let mut host = Host::new(GameConfig::default_test());
    host.game.add_task(0.0, "state.items.ghost.use", vec![]).unwrap();
    assert_eq!(host.advance(1.0), 10);
    assert!(host.game.scheduler().is_running());
    assert_eq!(host.game.failures().len(), 1);
}

#[test]
fn tasks_can_request_save_and_exit() {
    let store = MemoryStore::new();
    let time = ManualTime::new(0.0);
    let storage = StorageCell::new("slot", Box::new(store.clone()));
    let game = Game::new(GameConfig::default_test(), Rc::new(time.clone())).unwrap().with_storage(storage);
    let mut host = Host::wrap(time, game);

    host.game.add_task(0.1, "save", vec![]).unwrap();
    host.advance(0.2);
    assert!(store.get("slot").unwrap().is_some(), "the save request reached storage");
    assert!(host.game.is_running());

    host.game.add_task(0.1, "exit", vec![]).unwrap();
    host.advance(0.5);
    assert!(!host.game.is_running());
    assert!(!host.game.scheduler().is_running());
    let saves = host.game.drain_events().iter().filter(|e| matches!(e, UiEvent::Saved { .. })).count();
    assert_eq!(saves, 2, "exit saves too");
}

#[test]
fn autosave_writes_to_storage_on_its_interval() {
    let config = GameConfig { autosave_interval: Some(1.0), ..GameConfig::default_test() };
    let store = MemoryStore::new();
    let time = ManualTime::new(0.0);
    let storage = StorageCell::new("slot", Box::new(store.clone()));
    let game = Game::new(config.clone(), Rc::new(time.clone())).unwrap().with_storage(storage);
    let mut host = Host::wrap(time, game);

    host.advance(0.5);
    assert!(store.is_empty(), "not due yet");
    host.advance(1.0);
    assert_eq!(store.len(), 1, "one autosave after the first interval");

    let mut unstored = Host::new(config);
    unstored.advance(3.0);
    let saves = unstored.game.drain_events().iter().filter(|e| matches!(e, UiEvent::Saved { .. })).count();
    assert_eq!(saves, 0, "autosave needs storage");
}

#[test]
fn load_or_new_restores_what_was_saved() {
    let store = MemoryStore::new();
    let config = GameConfig::default_test();

    let time = ManualTime::new(0.0);
    let cell = StorageCell::new(config.save_key.clone(), Box::new(store.clone()));
    let game = Game::load_or_new(config.clone(), Rc::new(time.clone()), cell).unwrap();
    assert!(!game.was_restored(), "empty slot starts a new game");
    let mut host = Host::wrap(time, game);
    host.game.show_message("before the save");
    host.advance(2.0);
    host.game.exit().unwrap();

    let time = ManualTime::new(0.0);
    let cell = StorageCell::new(config.save_key.clone(), Box::new(store.clone()));
    let game = Game::load_or_new(config, Rc::new(time.clone()), cell).unwrap();
    assert!(game.was_restored());
    assert_eq!(game.state().messages, vec!["before the save"]);
    assert!((game.now() - 2.0).abs() < 1e-9, "virtual time resumes where it stopped");

    let mut host = Host::wrap(time, game);
    assert_eq!(host.advance(0.5), 5, "the restored game keeps ticking");
}

#[test]
fn corrupt_saves_are_reported_not_replaced() {
    let mut store = MemoryStore::new();
    store.put("slot", "{not json").unwrap();
    let cell = StorageCell::new("slot", Box::new(store.clone()));
    let result = Game::load_or_new(GameConfig::default_test(), Rc::new(ManualTime::new(0.0)), cell);
    assert!(matches!(result, Err(CoreError::Serialization(_))));
    assert_eq!(store.get("slot").unwrap().as_deref(), Some("{not json"));
}

#[test]
fn message_sequences_wait_for_their_gate_then_play_in_time() {
    let mut host = Host::new(GameConfig::default_test());
    let story = MessageSequence::new(vec![
        Step::message("one", 1.0),
        Step::message("two", 1.0).then("set_flag", vec![json!("told")]).unwrap(),
        Step::pause(0.5),
    ])
    .gated_on("awake");
    host.game.schedule_cont(Box::new(story));

    host.advance(3.0);
    assert!(host.game.state().messages.is_empty(), "gated until the flag is set");

    host.game.set_flag("awake").unwrap();
    host.advance(1.05);
    assert_eq!(host.game.state().messages, vec!["one"]);
    host.advance(1.0);
    assert_eq!(host.game.state().messages, vec!["one", "two"]);
    assert_eq!(host.game.get_flag("told"), Some(true), "step actions run with the step");

    host.advance(2.0);
    assert_eq!(host.game.scheduler().continuous_tasks().count(), 1, "only housekeeping remains");
}

#[test]
fn ui_changes_are_mirrored_as_events() {
    let mut host = Host::new(GameConfig::default_test());
    host.game.add_tab("main", "Room", false);
    host.game.show_tab("main", None).unwrap();
    host.game.show_message("hello");
    host.game.show_gauge("main", "energy").unwrap();
    host.game.hide_gauge("main", "energy").unwrap();

    let kinds: Vec<&str> = host.game.drain_events().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["tab_added", "tab_shown", "message_shown", "gauge_shown", "gauge_hidden"]);
    assert!(host.game.drain_events().is_empty(), "draining empties the outbox");

    let err = host.game.show_tab("nowhere", None).unwrap_err();
    assert!(matches!(err, CoreError::UnknownTab { .. }), "got {err:?}");
}

//! The game session — owns the state, the scheduler and persistence.
//!
//! TICK (one scheduler pass, then housekeeping owned by the session):
//!   1. Due one-shot tasks, in due-time order
//!   2. Continuous tasks, in registration order; a new game registers
//!      `game.update_vars` first, so variables advance once per tick
//!   3. Save/exit requests raised by tasks during the pass
//!   4. Autosave, when configured and due
//!
//! RULES:
//!   - Nothing here renders. UI-facing changes land in the state's outbox,
//!     which the host drains with drain_events().
//!   - Pausing freezes the clock and stops the scheduler; no task is lost.
//!   - There is no global "current game": hosts hold the Game and pass it
//!     around explicitly.

use crate::{
    action::Action,
    clock::{Clock, TimeSource},
    config::GameConfig,
    env::{create_task, make_variable_handler, GameEnv, RestoreEnv},
    error::CoreResult,
    event::UiEvent,
    items::Item,
    scheduler::{Scheduler, Task, Verdict},
    serial::{deserialize, json_to_ascii, serialize},
    snapshot::{Restored, Snapshot},
    state::GameState,
    store::StorageCell,
    types::{Seconds, TaskId},
    variable::Variable,
};
use serde_json::Value;
use std::{cell::RefCell, rc::Rc};

pub struct Game {
    state:         GameState,
    sched:         Scheduler<GameState>,
    config:        GameConfig,
    storage:       Option<StorageCell>,
    /// Messages of failed tasks, oldest first.
    failures:      Rc<RefCell<Vec<String>>>,
    next_autosave: Option<Seconds>,
    running:       bool,
    restored:      bool,
}

impl Game {
    /// A fresh game with the variable housekeeping task registered.
    pub fn new(config: GameConfig, time: Rc<dyn TimeSource>) -> CoreResult<Self> {
        let mut sched = Scheduler::new(Clock::new(time), config.fps);
        sched.add_cont_task(Box::new(create_task("update_vars", Vec::new())?));
        log::info!("new game at t={:.3} ({} fps)", sched.now(), config.fps);
        Ok(Self::assemble(config, GameState::new(), sched, false))
    }

    /// Rebuild a game from text produced by save().
    pub fn restore(config: GameConfig, time: Rc<dyn TimeSource>, text: &str) -> CoreResult<Self> {
        let env = RestoreEnv::standard(time);
        let Restored { state, scheduler } = deserialize(text, &env)?;
        log::info!("restored game at t={:.3}", scheduler.now());
        Ok(Self::assemble(config, state, scheduler, true))
    }

    /// Restore the game saved in `storage`, or start a new one when the slot
    /// is empty. The game keeps the cell for later saves.
    pub fn load_or_new(config: GameConfig, time: Rc<dyn TimeSource>, mut storage: StorageCell) -> CoreResult<Self> {
        let env = RestoreEnv::standard(Rc::clone(&time));
        let mut game = match storage.load::<Restored, _>(&env)? {
            Some(Restored { state, scheduler }) => {
                log::info!("restored game from slot '{}' at t={:.3}", storage.name(), scheduler.now());
                Self::assemble(config, state, scheduler, true)
            }
            None => {
                log::info!("slot '{}' is empty; starting a new game", storage.name());
                Self::new(config, time)?
            }
        };
        game.storage = Some(storage);
        Ok(game)
    }

    fn assemble(config: GameConfig, state: GameState, mut sched: Scheduler<GameState>, restored: bool) -> Self {
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&failures);
        let halt = config.halt_on_task_error;
        sched.set_error_sink(move |err| {
            log::error!("Exception while running task: {err}");
            sink.borrow_mut().push(err.to_string());
            if halt { Verdict::Stop } else { Verdict::Continue }
        });
        let next_autosave = config.autosave_interval.map(|i| sched.now() + i);
        Self {
            state,
            sched,
            config,
            storage: None,
            failures,
            next_autosave,
            running: true,
            restored,
        }
    }

    pub fn with_storage(mut self, storage: StorageCell) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &GameConfig { &self.config }

    pub fn state(&self) -> &GameState { &self.state }

    pub fn state_mut(&mut self) -> &mut GameState { &mut self.state }

    pub fn scheduler(&self) -> &Scheduler<GameState> { &self.sched }

    /// Mutable view over state and scheduler, as tasks see them.
    pub fn env(&mut self) -> GameEnv<'_> {
        GameEnv::new(&mut self.state, &mut self.sched)
    }

    pub fn now(&self) -> Seconds { self.sched.now() }

    pub fn was_restored(&self) -> bool { self.restored }

    pub fn is_running(&self) -> bool { self.running }

    pub fn is_paused(&self) -> bool { self.sched.clock().is_paused() }

    pub fn failures(&self) -> Vec<String> {
        self.failures.borrow().clone()
    }

    pub fn take_failures(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.failures.borrow_mut())
    }

    // ── Driving ────────────────────────────────────────────

    /// Install the host's re-arm hook; see Scheduler::set_requeue.
    pub fn set_requeue(&mut self, requeue: impl FnMut() + 'static) {
        self.sched.set_requeue(requeue);
    }

    /// Start (or restart) the scheduler. No-op after exit.
    pub fn start(&mut self) {
        if self.running && !self.is_paused() {
            self.sched.start();
        }
    }

    /// Host entry point for a fired requeue. Returns whether a tick ran.
    pub fn poll(&mut self) -> CoreResult<bool> {
        if !self.sched.poll(&mut self.state) {
            return Ok(false);
        }
        self.after_tick()?;
        Ok(true)
    }

    /// Run one tick unconditionally.
    pub fn run_tick(&mut self) -> CoreResult<()> {
        self.sched.run(&mut self.state);
        self.after_tick()
    }

    fn after_tick(&mut self) -> CoreResult<()> {
        let requests = self.state.take_requests();
        if requests.exit {
            return self.exit();
        }
        if requests.save {
            self.save()?;
        }
        if let (Some(due), Some(interval)) = (self.next_autosave, self.config.autosave_interval) {
            let now = self.sched.now();
            if now >= due {
                self.next_autosave = Some(now + interval);
                if self.storage.is_some() {
                    log::debug!("autosave at t={now:.3}");
                    self.save()?;
                }
            }
        }
        Ok(())
    }

    /// Serialize the game, store it in the storage cell if there is one, and
    /// return the saved text.
    pub fn save(&mut self) -> CoreResult<String> {
        let snapshot = Snapshot { state: &self.state, scheduler: &self.sched };
        let text = json_to_ascii(&serialize(&snapshot)?);
        if let Some(storage) = self.storage.as_mut() {
            storage.save_raw(text.clone())?;
            log::info!("saved game to slot '{}' ({} bytes)", storage.name(), text.len());
        }
        self.state.emit(UiEvent::Saved { bytes: text.len() });
        Ok(text)
    }

    /// Pause (Some(true)), unpause (Some(false)) or toggle (None). Returns
    /// whether the game is paused afterwards.
    pub fn pause(&mut self, pause: Option<bool>) -> bool {
        let pause = pause.unwrap_or(!self.is_paused());
        if pause {
            self.env().pause();
        } else if self.is_paused() {
            self.sched.clock_mut().resume();
            log::info!("game resumed at t={:.3}", self.sched.now());
            self.state.emit(UiEvent::PauseChanged { paused: false });
            self.start();
        }
        self.is_paused()
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.pause(None)
    }

    /// Save and stop for good.
    pub fn exit(&mut self) -> CoreResult<()> {
        self.save()?;
        self.running = false;
        self.sched.stop();
        log::info!("game exited at t={:.3}", self.sched.now());
        Ok(())
    }

    // ── Flags ──────────────────────────────────────────────

    pub fn get_flag(&self, name: &str) -> Option<bool> {
        self.state.flags.get(name)
    }

    /// Returns whether the value changed.
    pub fn set_flag(&mut self, name: &str) -> CoreResult<bool> {
        self.env().set_flag(name, true)
    }

    pub fn clear_flag(&mut self, name: &str) -> CoreResult<bool> {
        self.env().set_flag(name, false)
    }

    pub fn derive_flag(&mut self, name: &str, op: &str, operands: &[&str]) -> CoreResult<bool> {
        self.env().derive_flag(name, op, operands)
    }

    // ── Tasks ──────────────────────────────────────────────

    /// A caching Action for `method`, relative to the game.
    pub fn create_task(&self, method: &str, args: Vec<Value>) -> CoreResult<Action> {
        create_task(method, args)
    }

    /// Run `method` `delay` seconds from now.
    pub fn add_task(&mut self, delay: Seconds, method: &str, args: Vec<Value>) -> CoreResult<TaskId> {
        self.env().add_task(delay, method, args)
    }

    /// Run `method` on every tick until it returns something truthy.
    pub fn add_cont_task(&mut self, method: &str, args: Vec<Value>) -> CoreResult<TaskId> {
        self.env().add_cont_task(method, args)
    }

    /// Queue an arbitrary task `delay` seconds from now.
    pub fn schedule(&mut self, task: Box<dyn Task<GameState>>, delay: Seconds) -> TaskId {
        self.sched.add_task_in(task, delay)
    }

    pub fn schedule_cont(&mut self, task: Box<dyn Task<GameState>>) -> TaskId {
        self.sched.add_cont_task(task)
    }

    // ── Presentation ───────────────────────────────────────

    pub fn show_message(&mut self, text: impl Into<String>) {
        self.state.show_message(text);
    }

    pub fn add_tab(&mut self, name: &str, display_name: &str, hidden: bool) {
        self.state.add_tab(name, display_name, hidden);
    }

    pub fn show_tab(&mut self, name: &str, hidden: Option<bool>) -> CoreResult<()> {
        self.state.show_tab(name, hidden)
    }

    pub fn show_item(&mut self, tab: &str, item: &str) -> CoreResult<()> {
        self.state.show_item(tab, item, true)
    }

    pub fn hide_item(&mut self, tab: &str, item: &str) -> CoreResult<()> {
        self.state.show_item(tab, item, false)
    }

    pub fn show_gauge(&mut self, tab: &str, gauge: &str) -> CoreResult<()> {
        self.state.show_gauge(tab, gauge, true)
    }

    pub fn hide_gauge(&mut self, tab: &str, gauge: &str) -> CoreResult<()> {
        self.state.show_gauge(tab, gauge, false)
    }

    pub fn drain_events(&mut self) -> Vec<UiEvent> {
        self.state.drain_events()
    }

    // ── Variables and items ────────────────────────────────

    pub fn make_variable(&mut self, name: &str, value: f64, min: Option<f64>, max: Option<f64>) -> &mut Variable {
        self.state.make_variable(name, value, min, max)
    }

    /// A rate handler tracking the named variable times `factor`.
    pub fn make_variable_handler(&self, name: &str, factor: f64) -> Action {
        make_variable_handler(name, factor)
    }

    pub fn variable(&self, name: &str) -> CoreResult<&Variable> {
        self.state.variable(name)
    }

    pub fn add_item(&mut self, item: Box<dyn Item>) -> CoreResult<()> {
        self.env().add_item(item)
    }

    pub fn remove_item(&mut self, name: &str) -> CoreResult<bool> {
        self.env().remove_item(name)
    }

    pub fn use_item(&mut self, name: &str) -> CoreResult<Value> {
        self.env().call_item(name, "use", Vec::new())
    }

    pub fn call_item(&mut self, name: &str, method: &str, args: Vec<Value>) -> CoreResult<Value> {
        self.env().call_item(name, method, args)
    }
}

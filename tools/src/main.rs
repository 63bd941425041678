//! dasca-runner: headless driver for the Dasca simulation core.
//!
//! Usage:
//!   dasca-runner --seconds 120 --db save.db
//!   dasca-runner --config dasca.json --db save.db --fresh --ipc-mode
//!
//! The game runs on a manual clock: virtual time only advances when the
//! runner says so, one tick (1/fps seconds) at a time.

use anyhow::Result;
use dasca_core::{
    clock::{ManualTime, TimeSource},
    config::GameConfig,
    engine::Game,
    event::UiEvent,
    items::{Button, Crank, Label, Lighter, Reactor},
    sequence::{MessageSequence, Step},
    serial::Persist,
    store::{SqliteStore, StorageCell},
};
use serde_json::{json, Map, Value};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::env;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Advance { seconds: f64 },
    Use { item: String },
    Turn { item: String, on: bool },
    Pause,
    Resume,
    Save,
    Quit,
}

#[derive(serde::Serialize)]
struct UiState {
    time:      f64,
    ticks:     u64,
    paused:    bool,
    running:   bool,
    messages:  Vec<String>,
    variables: BTreeMap<String, f64>,
    flags:     BTreeMap<String, bool>,
    items:     BTreeMap<String, Value>,
    events:    Vec<UiEvent>,
    failures:  Vec<String>,
}

/// A game on a manual clock, plus the flag its requeue hook raises.
struct Driver {
    game:   Game,
    time:   ManualTime,
    queued: Rc<Cell<bool>>,
}

impl Driver {
    /// Advance virtual time by `seconds`, polling whenever a tick is queued.
    fn advance(&mut self, seconds: f64) -> Result<u64> {
        let step = 1.0 / self.game.config().fps;
        let steps = (seconds / step).round().max(0.0) as u64;
        let mut ran = 0;
        for _ in 0..steps {
            if !self.game.is_running() {
                break;
            }
            self.time.advance(step);
            if self.queued.replace(false) && self.game.poll()? {
                ran += 1;
            }
        }
        Ok(ran)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seconds = parse_arg(&args, "--seconds", 60.0f64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let fresh = args.iter().any(|a| a == "--fresh");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let config = match string_arg(&args, "--config") {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };

    if !ipc_mode {
        println!("Dasca: dasca-runner");
        println!("  seconds:   {seconds}");
        println!("  db:        {db}");
        println!("  fps:       {}", config.fps);
        println!("  save key:  {}", config.save_key);
        println!();
    }

    let store = if db == ":memory:" { SqliteStore::in_memory()? } else { SqliteStore::open(db)? };
    let mut storage = StorageCell::new(config.save_key.clone(), Box::new(store));
    if fresh && storage.clear()? {
        log::info!("discarded saved game '{}'", config.save_key);
    }

    let time = ManualTime::new(0.0);
    let source: Rc<dyn TimeSource> = Rc::new(time.clone());
    let mut game = Game::load_or_new(config, source, storage)?;
    if !game.was_restored() {
        seed_demo(&mut game)?;
    }

    let queued = Rc::new(Cell::new(false));
    let flag = Rc::clone(&queued);
    game.set_requeue(move || flag.set(true));
    game.start();

    let mut driver = Driver { game, time, queued };
    if ipc_mode {
        run_ipc_loop(&mut driver)?;
    } else {
        let ticks = driver.advance(seconds)?;
        driver.game.save()?;
        print_summary(&mut driver.game, ticks);
    }
    Ok(())
}

/// A small world: a lighter that must be lit before the story starts, and a
/// crank and a reactor both feeding one energy pool.
fn seed_demo(game: &mut Game) -> Result<()> {
    game.add_tab("main", "Room", false);
    game.show_tab("main", None)?;
    game.make_variable("energy", 0.0, Some(0.0), Some(100.0));

    game.add_item(Box::new(Label::new("intro", "A dark room.")))?;
    game.add_item(Box::new(Lighter::new("lighter", 10.0, 10.0)))?;
    game.add_item(Box::new(Crank::new("crank", 5.0, 2.0, 1.0)))?;
    game.add_item(Box::new(Reactor::new("reactor")))?;
    game.add_item(Box::new(
        Button::new("strike", "Strike the lighter", "state.items.lighter.use", Vec::new()).with_delay(0.5),
    ))?;
    for name in ["intro", "strike", "lighter"] {
        game.show_item("main", name)?;
    }
    game.show_gauge("main", "energy")?;

    game.call_item("lighter", "bind_flag", vec![json!("lit")])?;
    game.call_item("crank", "attach_to", vec![json!("energy"), json!(1.0)])?;
    game.call_item("reactor", "attach_to", vec![json!("energy"), json!(1.0)])?;
    game.call_item("crank", "turn", vec![json!(true)])?;

    let story = MessageSequence::new(vec![
        Step::message("The flame flickers.", 2.0),
        Step::message("Something hums in the dark.", 3.0).then("state.items.reactor.set_active", vec![json!(true)])?,
        Step::message("The hum settles.", 1.0),
    ])
    .gated_on("lit");
    game.schedule_cont(Box::new(story));
    game.add_task(1.0, "use_item", vec![json!("strike")])?;
    Ok(())
}

fn run_ipc_loop(driver: &mut Driver) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let outcome = match cmd {
            IpcCommand::Quit => {
                driver.game.exit()?;
                break;
            }
            IpcCommand::GetState => Ok(()),
            IpcCommand::Advance { seconds } => driver.advance(seconds).map(|_| ()),
            IpcCommand::Use { item } => driver.game.use_item(&item).map(|_| ()).map_err(Into::into),
            IpcCommand::Turn { item, on } => driver
                .game
                .call_item(&item, "turn", vec![json!(on)])
                .map(|_| ())
                .map_err(Into::into),
            IpcCommand::Pause => {
                driver.game.pause(Some(true));
                Ok(())
            }
            IpcCommand::Resume => {
                driver.game.pause(Some(false));
                Ok(())
            }
            IpcCommand::Save => driver.game.save().map(|_| ()).map_err(Into::into),
        };

        match outcome {
            Ok(()) => {
                let state = build_ui_state(&mut driver.game);
                writeln!(stdout, "{}", serde_json::to_string(&state)?)?;
            }
            Err(e) => writeln!(stdout, "{}", json!({ "error": e.to_string() }))?,
        }
        stdout.flush()?;
    }
    Ok(())
}

fn build_ui_state(game: &mut Game) -> UiState {
    let events = game.drain_events();
    let failures = game.take_failures();
    let state = game.state();

    let variables = state.variables.iter().map(|(name, var)| (name.clone(), var.value)).collect();
    let flags = state
        .flags
        .names()
        .filter_map(|name| state.flags.get(name).map(|v| (name.to_string(), v)))
        .collect();
    let items = state
        .item_names()
        .filter_map(|name| state.item(name).map(|item| (name, item)))
        .map(|(name, item)| {
            let mut entry = Map::new();
            entry.insert("kind".into(), json!(item.type_tag()));
            entry.insert("active".into(), json!(item.is_active()));
            (name.to_string(), Value::Object(entry))
        })
        .collect();

    UiState {
        time: game.now(),
        ticks: game.scheduler().ticks(),
        paused: game.is_paused(),
        running: game.is_running(),
        messages: state.messages.iter().rev().take(10).rev().cloned().collect(),
        variables,
        flags,
        items,
        events,
        failures,
    }
}

fn print_summary(game: &mut Game, ticks: u64) {
    let failures = game.take_failures();
    let state = game.state();

    println!("=== RUN SUMMARY ===");
    println!("  virtual time:   {:.1}s", game.now());
    println!("  ticks run:      {ticks}");
    println!("  paused:         {}", game.is_paused());
    println!("  task failures:  {}", failures.len());

    println!();
    println!("=== VARIABLES ===");
    for (name, var) in &state.variables {
        println!("  {name:<18} {:>10.3}", var.value);
    }

    println!();
    println!("=== MESSAGES ===");
    if state.messages.is_empty() {
        println!("  (none)");
    }
    for message in &state.messages {
        println!("  {message}");
    }
    for failure in failures {
        log::warn!("task failure: {failure}");
    }
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

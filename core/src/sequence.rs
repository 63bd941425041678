//! Message sequences — timed runs of messages, as a continuous task.
//!
//! RULES:
//!   - A step shows its message (if any), runs its Action (if any), and
//!     schedules the next step `delay` seconds later.
//!   - While the gating flag is not set, the sequence re-checks once a second
//!     and shows nothing.
//!   - The task reports done on the first poll after the last step's delay.

use crate::{
    action::Action,
    env::{create_task, GameEnv},
    error::CoreResult,
    scheduler::{Scheduler, Task},
    serial::{restore_fields, save_fields, Persist, Restore},
    state::GameState,
    types::Seconds,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;

const GATE_RECHECK: Seconds = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub delay:   Seconds,
    #[serde(default)]
    pub action:  Option<Action>,
}

impl Step {
    pub fn message(text: impl Into<String>, delay: Seconds) -> Self {
        Self { message: Some(text.into()), delay, action: None }
    }

    /// A silent step that only waits.
    pub fn pause(delay: Seconds) -> Self {
        Self { message: None, delay, action: None }
    }

    /// Also run `method` (see create_task) when this step fires.
    pub fn then(mut self, method: &str, args: Vec<Value>) -> CoreResult<Self> {
        self.action = Some(create_task(method, args)?);
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSequence {
    steps:        Vec<Step>,
    #[serde(default)]
    next_index:   usize,
    #[serde(default)]
    next_time:    Option<Seconds>,
    #[serde(default)]
    delay_if_not: Option<String>,
}

impl MessageSequence {
    pub const TAG_NAME: &'static str = "MessageSequence";

    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, next_index: 0, next_time: None, delay_if_not: None }
    }

    /// Hold every step until `flag` is set.
    pub fn gated_on(mut self, flag: impl Into<String>) -> Self {
        self.delay_if_not = Some(flag.into());
        self
    }

    pub fn next_index(&self) -> usize { self.next_index }

    pub fn is_exhausted(&self) -> bool {
        self.next_index >= self.steps.len()
    }
}

impl Task<GameState> for MessageSequence {
    fn run(&mut self, now: Seconds, state: &mut GameState, sched: &mut Scheduler<GameState>) -> CoreResult<bool> {
        if self.next_time.is_some_and(|t| now < t) {
            return Ok(false);
        }
        if self.is_exhausted() {
            return Ok(true);
        }
        let mut env = GameEnv::new(state, sched);
        if let Some(flag) = &self.delay_if_not {
            if !env.state.flags.is_set(flag) {
                self.next_time = Some(now + GATE_RECHECK);
                return Ok(false);
            }
        }

        let step = &self.steps[self.next_index];
        self.next_index += 1;
        self.next_time = Some(now + step.delay);
        if let Some(text) = &step.message {
            env.state.show_message(text.clone());
        }
        if let Some(action) = &step.action {
            action.run(&mut env, Vec::new())?;
        }
        Ok(false)
    }

    fn as_any(&self) -> &dyn Any { self }
}

impl Persist for MessageSequence {
    fn type_tag(&self) -> &'static str { Self::TAG_NAME }

    fn save(&self) -> CoreResult<Value> {
        save_fields(self)
    }
}

impl<E: ?Sized> Restore<E> for MessageSequence {
    const TAG: &'static str = Self::TAG_NAME;

    fn restore(body: Map<String, Value>, _env: &E) -> CoreResult<Self> {
        restore_fields(body)
    }

    fn reinit(&mut self, _env: &E) {
        for action in self.steps.iter_mut().filter_map(|s| s.action.as_mut()) {
            action.invalidate();
        }
    }
}

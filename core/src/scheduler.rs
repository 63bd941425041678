//! Cooperative task scheduler driven by a virtual clock.
//!
//! STATE MACHINE: idle -> armed -> idle.
//!   - Adding work while running and not armed arms the scheduler: the
//!     host's requeue hook is invoked exactly once.
//!   - run() processes one tick, then re-arms if any work remains.
//!   - At most one requeue request is outstanding at any time.
//!
//! ORDERING:
//!   - One-shot tasks run in ascending due time, ties in insertion order.
//!   - Continuous tasks run in registration order over a snapshot taken at
//!     the start of the pass.
//!   - Work added during a tick never runs in that same tick.
//!
//! A failing task never aborts the tick. The error goes to the error sink
//! (or the log) and the remaining tasks still run.

use crate::{
    clock::{Clock, ClockState, TimeSource},
    error::{CoreError, CoreResult},
    serial::{restore_fields, save_fields, to_tagged, Persist, Registry, Restore},
    types::{Seconds, TaskId},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{any::Any, collections::VecDeque, fmt, rc::Rc};

pub const SCHEDULER_TAG: &str = "Scheduler";

/// A unit of scheduled work, run against a context `C`.
pub trait Task<C>: Persist {
    /// Run the task. A continuous task returns `Ok(true)` to remove itself;
    /// the return value of a one-shot task is ignored.
    fn run(&mut self, now: Seconds, ctx: &mut C, sched: &mut Scheduler<C>) -> CoreResult<bool>;

    /// Told the due time when queued as a one-shot task.
    fn schedule_at(&mut self, _time: Seconds) {}

    /// A due time the task already carries, used when queued without one.
    fn due_time(&self) -> Option<Seconds> { None }

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

/// What the scheduler does after reporting a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Stop after the current tick; the rest of the tick still runs.
    Stop,
}

type Requeue = Box<dyn FnMut()>;
type ErrorSink = Box<dyn FnMut(&CoreError) -> Verdict>;

struct Pending<C> {
    id:   TaskId,
    time: Seconds,
    task: Box<dyn Task<C>>,
}

struct Continuous<C> {
    id:   TaskId,
    task: Box<dyn Task<C>>,
}

pub struct Scheduler<C> {
    clock:      Clock,
    fps:        f64,
    running:    bool,
    armed:      bool,
    /// Clock reading sampled at the start of the last tick.
    time:       Seconds,
    ticks:      u64,
    next_id:    u64,
    tasks:      VecDeque<Pending<C>>,
    cont_tasks: Vec<Continuous<C>>,
    in_pass:    bool,
    /// Continuous tasks removed while their snapshot was being run.
    removed:    Vec<TaskId>,
    requeue:    Option<Requeue>,
    on_error:   Option<ErrorSink>,
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("clock", &self.clock)
            .field("fps", &self.fps)
            .field("running", &self.running)
            .field("armed", &self.armed)
            .field("tasks", &self.tasks.len())
            .field("cont_tasks", &self.cont_tasks.len())
            .finish()
    }
}

impl<C> Scheduler<C> {
    pub fn new(clock: Clock, fps: f64) -> Self {
        let time = clock.now();
        Self {
            clock,
            fps,
            running:    false,
            armed:      false,
            time,
            ticks:      0,
            next_id:    1,
            tasks:      VecDeque::new(),
            cont_tasks: Vec::new(),
            in_pass:    false,
            removed:    Vec::new(),
            requeue:    None,
            on_error:   None,
        }
    }

    /// Install the host's re-arm primitive. It must arrange for `poll()` (or
    /// `run()`) to be called later, never synchronously.
    pub fn set_requeue(&mut self, requeue: impl FnMut() + 'static) {
        self.requeue = Some(Box::new(requeue));
    }

    pub fn set_error_sink(&mut self, sink: impl FnMut(&CoreError) -> Verdict + 'static) {
        self.on_error = Some(Box::new(sink));
    }

    pub fn clock(&self) -> &Clock { &self.clock }

    pub fn clock_mut(&mut self) -> &mut Clock { &mut self.clock }

    pub fn now(&self) -> Seconds { self.clock.now() }

    /// Clock reading at the start of the last tick.
    pub fn time(&self) -> Seconds { self.time }

    pub fn ticks(&self) -> u64 { self.ticks }

    pub fn fps(&self) -> f64 { self.fps }

    /// The fixed simulation step of one tick.
    pub fn step(&self) -> Seconds { 1.0 / self.fps }

    pub fn is_running(&self) -> bool { self.running }

    pub fn is_armed(&self) -> bool { self.armed }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty() && self.cont_tasks.is_empty()
    }

    pub fn start(&mut self) {
        self.running = true;
        if !self.is_idle() {
            self.arm();
        }
    }

    /// Stop after the current tick. A requeue already issued stays issued;
    /// `poll()` ignores it.
    pub fn stop(&mut self) {
        self.running = false;
    }

    fn arm(&mut self) {
        if self.armed || !self.running {
            return;
        }
        self.armed = true;
        if let Some(requeue) = self.requeue.as_mut() {
            requeue();
        }
    }

    fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert_pending(&mut self, id: TaskId, time: Seconds, task: Box<dyn Task<C>>) {
        let at = self.tasks.partition_point(|p| p.time <= time);
        self.tasks.insert(at, Pending { id, time, task });
    }

    /// Queue a one-shot task. Without a time it is due at the task's own
    /// `due_time()`, else now, i.e. on the next tick.
    pub fn add_task(&mut self, mut task: Box<dyn Task<C>>, time: Option<Seconds>) -> TaskId {
        let time = time.or_else(|| task.due_time()).unwrap_or_else(|| self.clock.now());
        task.schedule_at(time);
        let id = self.next_id();
        self.insert_pending(id, time, task);
        self.arm();
        id
    }

    /// Queue a one-shot task `delay` seconds from now. A non-positive delay
    /// still waits for the next tick.
    pub fn add_task_in(&mut self, task: Box<dyn Task<C>>, delay: Seconds) -> TaskId {
        let time = self.clock.now() + delay;
        self.add_task(task, Some(time))
    }

    pub fn add_cont_task(&mut self, task: Box<dyn Task<C>>) -> TaskId {
        let id = self.next_id();
        self.cont_tasks.push(Continuous { id, task });
        self.arm();
        id
    }

    /// Cancel a pending one-shot task. No-op (None) if it is not queued.
    pub fn remove_task(&mut self, id: TaskId) -> Option<Box<dyn Task<C>>> {
        let at = self.tasks.iter().position(|p| p.id == id)?;
        self.tasks.remove(at).map(|p| p.task)
    }

    /// Cancel a continuous task. During a pass the task still finishes the
    /// current pass and is dropped afterwards.
    pub fn remove_cont_task(&mut self, id: TaskId) {
        if let Some(at) = self.cont_tasks.iter().position(|c| c.id == id) {
            self.cont_tasks.remove(at);
        } else if self.in_pass {
            self.removed.push(id);
        }
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = (TaskId, Seconds, &dyn Task<C>)> + '_ {
        self.tasks.iter().map(|p| (p.id, p.time, p.task.as_ref()))
    }

    pub fn continuous_tasks(&self) -> impl Iterator<Item = (TaskId, &dyn Task<C>)> + '_ {
        self.cont_tasks.iter().map(|c| (c.id, c.task.as_ref()))
    }

    /// Host entry point for a fired requeue: runs a tick only while running.
    pub fn poll(&mut self, ctx: &mut C) -> bool {
        self.armed = false;
        if !self.running {
            return false;
        }
        self.run(ctx);
        true
    }

    /// Process one tick: every due one-shot task, then every continuous task
    /// once. Must not be called from inside a task.
    pub fn run(&mut self, ctx: &mut C) {
        self.armed = false;
        let now = self.clock.now();
        self.time = now;
        self.ticks += 1;

        let due_count = self.tasks.partition_point(|p| p.time <= now);
        let due: Vec<Pending<C>> = self.tasks.drain(..due_count).collect();
        log::trace!(
            "tick {} at t={now:.3}: {} due, {} continuous",
            self.ticks,
            due.len(),
            self.cont_tasks.len()
        );
        for mut pending in due {
            self.run_task(pending.task.as_mut(), now, ctx);
        }

        let snapshot = std::mem::take(&mut self.cont_tasks);
        let mut survivors = Vec::with_capacity(snapshot.len());
        self.in_pass = true;
        for mut entry in snapshot {
            if self.run_task(entry.task.as_mut(), now, ctx) {
                log::debug!("continuous task {} ({}) finished", entry.id.raw(), entry.task.type_tag());
            } else {
                survivors.push(entry);
            }
        }
        self.in_pass = false;

        let removed = std::mem::take(&mut self.removed);
        survivors.retain(|c| !removed.contains(&c.id));
        let added = std::mem::replace(&mut self.cont_tasks, survivors);
        self.cont_tasks.extend(added);

        if !self.is_idle() {
            self.arm();
        }
    }

    fn run_task(&mut self, task: &mut dyn Task<C>, now: Seconds, ctx: &mut C) -> bool {
        match task.run(now, ctx, self) {
            Ok(done) => done,
            Err(err) => {
                self.report(task.type_tag(), &err);
                false
            }
        }
    }

    fn report(&mut self, tag: &str, err: &CoreError) {
        let verdict = match self.on_error.as_mut() {
            Some(sink) => sink(err),
            None => {
                log::error!("Exception while running task {tag}: {err}");
                Verdict::Continue
            }
        };
        if verdict == Verdict::Stop {
            log::warn!("scheduler stopping after failure in task {tag}");
            self.running = false;
        }
    }
}

/// A native closure as a task. Never persistable.
pub struct FnTask<F> {
    name: String,
    func: F,
}

impl<F: 'static> FnTask<F> {
    pub fn boxed<C>(name: impl Into<String>, func: F) -> Box<dyn Task<C>>
    where
        F: FnMut(Seconds, &mut C, &mut Scheduler<C>) -> CoreResult<bool>,
    {
        Box::new(FnTask { name: name.into(), func })
    }
}

impl<C, F> Task<C> for FnTask<F>
where
    F: FnMut(Seconds, &mut C, &mut Scheduler<C>) -> CoreResult<bool> + 'static,
{
    fn run(&mut self, now: Seconds, ctx: &mut C, sched: &mut Scheduler<C>) -> CoreResult<bool> {
        (self.func)(now, ctx, sched)
    }

    fn as_any(&self) -> &dyn Any { self }
}

impl<F> Persist for FnTask<F> {
    fn type_tag(&self) -> &'static str { "FnTask" }

    fn save(&self) -> CoreResult<Value> {
        Err(CoreError::Unserializable { name: self.name.clone() })
    }
}

/// What restoring a scheduler needs from its environment.
pub trait SchedulerEnv {
    type Ctx;

    fn task_registry(&self) -> &Registry<dyn Task<Self::Ctx>, Self>;

    fn time_source(&self) -> Rc<dyn TimeSource>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerOut {
    clock:      ClockState,
    fps:        f64,
    tasks:      Vec<Value>,
    cont_tasks: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerIn {
    clock:      ClockState,
    fps:        f64,
    #[serde(default)]
    tasks:      Vec<Value>,
    #[serde(default)]
    cont_tasks: Vec<Value>,
}

impl<C> Persist for Scheduler<C> {
    fn type_tag(&self) -> &'static str { SCHEDULER_TAG }

    fn save(&self) -> CoreResult<Value> {
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for pending in &self.tasks {
            let mut value = to_tagged(pending.task.as_ref())?;
            if let Value::Object(map) = &mut value {
                map.entry("time").or_insert(Value::from(pending.time));
            }
            tasks.push(value);
        }
        let cont_tasks = self
            .cont_tasks
            .iter()
            .map(|c| to_tagged(c.task.as_ref()))
            .collect::<CoreResult<Vec<_>>>()?;
        save_fields(&SchedulerOut {
            clock: self.clock.state(),
            fps: self.fps,
            tasks,
            cont_tasks,
        })
    }
}

impl<C, E> Restore<E> for Scheduler<C>
where
    E: SchedulerEnv<Ctx = C>,
{
    const TAG: &'static str = SCHEDULER_TAG;

    fn restore(body: Map<String, Value>, env: &E) -> CoreResult<Self> {
        let repr: SchedulerIn = restore_fields(body)?;
        let clock = Clock::restore(repr.clock, env.time_source());
        let mut sched = Scheduler::new(clock, repr.fps);
        let registry = env.task_registry();
        for value in repr.tasks {
            let time = value.get("time").and_then(Value::as_f64).unwrap_or(0.0);
            let mut task = registry.restore(value, env)?;
            task.schedule_at(time);
            let id = sched.next_id();
            sched.insert_pending(id, time, task);
        }
        for value in repr.cont_tasks {
            let task = registry.restore(value, env)?;
            let id = sched.next_id();
            sched.cont_tasks.push(Continuous { id, task });
        }
        log::debug!(
            "restored scheduler: {} pending, {} continuous",
            sched.tasks.len(),
            sched.cont_tasks.len()
        );
        Ok(sched)
    }
}

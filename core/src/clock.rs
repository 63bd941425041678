//! Virtual clock — a linear transform over a monotonic time source.
//!
//!   now() = source() * scale + offset
//!
//! RULES:
//!   - The offset is always re-solved from a fresh sample, never accumulated.
//!   - set_scale() and derive() keep now() continuous; only set_time() jumps.
//!   - Pausing is scale = 0; the scheduler's queues are never touched.

use crate::types::Seconds;
use serde::{Deserialize, Serialize};
use std::{cell::Cell, fmt, rc::Rc, time::Instant};

/// A monotonic reading in seconds.
pub trait TimeSource {
    fn sample(&self) -> Seconds;
}

/// Wall-clock seconds elapsed since construction.
pub struct WallTime {
    origin: Instant,
}

impl WallTime {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for WallTime {
    fn default() -> Self { Self::new() }
}

impl TimeSource for WallTime {
    fn sample(&self) -> Seconds {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A settable time source. Clones share the same reading, so a test (or a
/// fast-forwarding host) keeps one handle and the clock keeps another.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now: Rc<Cell<Seconds>>,
}

impl ManualTime {
    pub fn new(start: Seconds) -> Self {
        Self { now: Rc::new(Cell::new(start)) }
    }

    pub fn get(&self) -> Seconds { self.now.get() }

    pub fn set(&self, time: Seconds) { self.now.set(time); }

    pub fn advance(&self, delta: Seconds) {
        self.now.set(self.now.get() + delta);
    }
}

impl TimeSource for ManualTime {
    fn sample(&self) -> Seconds {
        self.now.get()
    }
}

/// The persisted form of a clock: its rate and its reading at save time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ClockState {
    pub scale: f64,
    pub time:  Seconds,
}

#[derive(Clone)]
pub struct Clock {
    source:       Rc<dyn TimeSource>,
    scale:        f64,
    offset:       Seconds,
    /// Scale to return to on resume(); Some while paused.
    paused_scale: Option<f64>,
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("scale", &self.scale)
            .field("offset", &self.offset)
            .field("paused", &self.paused_scale.is_some())
            .finish()
    }
}

impl Clock {
    pub fn new(source: Rc<dyn TimeSource>) -> Self {
        Self { source, scale: 1.0, offset: 0.0, paused_scale: None }
    }

    /// A clock running on wall time, reading zero now.
    pub fn wall() -> Self {
        Self::new(Rc::new(WallTime::new()))
    }

    /// A clock driven by a shared manual time source.
    pub fn manual(time: &ManualTime) -> Self {
        Self::new(Rc::new(time.clone()))
    }

    pub fn now(&self) -> Seconds {
        self.source.sample() * self.scale + self.offset
    }

    pub fn scale(&self) -> f64 { self.scale }

    pub fn offset(&self) -> Seconds { self.offset }

    pub fn is_paused(&self) -> bool { self.paused_scale.is_some() }

    /// Build a sub-clock on the same source: child = self * scale + offset.
    ///
    /// Without an explicit offset the child is anchored to read exactly what
    /// this clock reads at the moment of the call.
    pub fn derive(&self, scale: Option<f64>, offset: Option<Seconds>) -> Clock {
        let scale = scale.unwrap_or(1.0);
        let offset = match offset {
            Some(offset) => offset,
            None => {
                let parent_now = self.now();
                parent_now - parent_now * scale
            }
        };
        Clock {
            source:       Rc::clone(&self.source),
            scale:        self.scale * scale,
            offset:       self.offset * scale + offset,
            paused_scale: None,
        }
    }

    /// Change the rate of time flow without a jump in now().
    pub fn set_scale(&mut self, scale: f64) {
        let sample = self.source.sample();
        let now = sample * self.scale + self.offset;
        self.scale = scale;
        self.offset = now - sample * scale;
    }

    /// Jump to an absolute reading.
    pub fn set_time(&mut self, time: Seconds) {
        self.offset = time - self.source.sample() * self.scale;
    }

    pub fn pause(&mut self) {
        if self.paused_scale.is_none() {
            self.paused_scale = Some(self.scale);
            self.set_scale(0.0);
        }
    }

    pub fn resume(&mut self) {
        if let Some(scale) = self.paused_scale.take() {
            self.set_scale(scale);
        }
    }

    /// Snapshot for persistence. A paused clock persists the scale it will
    /// resume with.
    pub fn state(&self) -> ClockState {
        ClockState {
            scale: self.paused_scale.unwrap_or(self.scale),
            time:  self.now(),
        }
    }

    /// Rebuild a clock from a snapshot on a fresh source.
    pub fn restore(state: ClockState, source: Rc<dyn TimeSource>) -> Self {
        let mut clock = Clock::new(source);
        clock.scale = state.scale;
        clock.set_time(state.time);
        clock
    }

    /// The underlying source, shared with derived clocks.
    pub fn source(&self) -> Rc<dyn TimeSource> {
        Rc::clone(&self.source)
    }
}

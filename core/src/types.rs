//! Shared primitive types used across the core.

/// Virtual time, in seconds.
pub type Seconds = f64;

/// Handle for a task registered with a scheduler.
/// Removal goes through the handle, never through the task value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

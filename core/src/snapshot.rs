//! Snapshot — the persisted root of a game.
//!
//! The scheduler cannot live inside GameState (tasks run against the state),
//! so a saved game is the pair of both, under one "Game" tag:
//!
//!   { "__type__": "Game", "version": 1,
//!     "state": { "__type__": "GameState", ... },
//!     "scheduler": { "__type__": "Scheduler", ... } }

use crate::{
    env::RestoreEnv,
    error::{CoreError, CoreResult},
    scheduler::Scheduler,
    serial::{restore_tagged, to_tagged, Persist, Restore},
    state::GameState,
};
use serde_json::{json, Map, Value};

pub const SNAPSHOT_TAG: &str = "Game";
pub const SNAPSHOT_VERSION: u64 = 1;

/// Borrowed view used for saving.
pub struct Snapshot<'a> {
    pub state:     &'a GameState,
    pub scheduler: &'a Scheduler<GameState>,
}

impl Persist for Snapshot<'_> {
    fn type_tag(&self) -> &'static str { SNAPSHOT_TAG }

    fn save(&self) -> CoreResult<Value> {
        Ok(json!({
            "version":   SNAPSHOT_VERSION,
            "state":     to_tagged(self.state)?,
            "scheduler": to_tagged(self.scheduler)?,
        }))
    }
}

/// Owned result of restoring a snapshot.
pub struct Restored {
    pub state:     GameState,
    pub scheduler: Scheduler<GameState>,
}

fn take(body: &mut Map<String, Value>, key: &str) -> CoreResult<Value> {
    body.remove(key)
        .ok_or_else(|| CoreError::NotAnObject { context: format!("{SNAPSHOT_TAG}.{key}") })
}

impl Restore<RestoreEnv> for Restored {
    const TAG: &'static str = SNAPSHOT_TAG;

    fn restore(mut body: Map<String, Value>, env: &RestoreEnv) -> CoreResult<Self> {
        let version = body.get("version").and_then(Value::as_u64).unwrap_or(SNAPSHOT_VERSION);
        if version > SNAPSHOT_VERSION {
            log::warn!("snapshot version {version} is newer than {SNAPSHOT_VERSION}; restoring anyway");
        }
        let state = restore_tagged(take(&mut body, "state")?, env)?;
        let scheduler = restore_tagged(take(&mut body, "scheduler")?, env)?;
        Ok(Self { state, scheduler })
    }
}

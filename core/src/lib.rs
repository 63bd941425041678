//! dasca-core: the simulation core of Dasca, an incremental game.
//!
//! A virtual clock drives a cooperative scheduler; variables integrate their
//! rate handlers once per tick; flags derive from one another; and the whole
//! object graph saves to and restores from tagged JSON.

pub mod action;
pub mod clock;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod event;
pub mod flags;
pub mod items;
pub mod scheduler;
pub mod sequence;
pub mod serial;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod types;
pub mod variable;

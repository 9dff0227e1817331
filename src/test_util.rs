//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use crate::changes::ChangeRecord;
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub(crate) x: i32,
    pub(crate) y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Velocity {
    pub(crate) dx: i32,
    pub(crate) dy: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Health(pub(crate) i32);

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A batch subscriber that appends every record it sees to a shared log.
pub(crate) fn record_batches(world: &World) -> Arc<Mutex<Vec<ChangeRecord>>> {
    let seen: Arc<Mutex<Vec<ChangeRecord>>> = Arc::default();
    let sink = Arc::clone(&seen);
    world.subscribe_changes(move |batch| {
        sink.lock().expect("no poisoned batch log").extend_from_slice(batch)
    });
    seen
}

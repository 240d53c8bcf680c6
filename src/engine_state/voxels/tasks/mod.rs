//! # Tile Generation Passes
//!
//! The scheduled work a tile runs through. Each pass is queued as a
//! positioned, high-priority task anchored at the tile's centroid, holds only a
//! weak reference to its tile, and carries the tile's cancellation token.

use std::sync::{Arc, Weak};

use crate::engine_state::task_management::task::{PriorityClass, PriorityTask, TaskHandle};

use super::tile::Tile;

pub mod surface_pass;
pub mod terrain_pass;

/// Priority class every generation pass is queued with.
pub const GENERATION_CLASS: PriorityClass = PriorityClass::High;

/// Queues `pass` for `tile`.
fn schedule_pass(tile: &Arc<Tile>, pass: fn(&Arc<Tile>)) -> TaskHandle {
    let weak: Weak<Tile> = Arc::downgrade(tile);
    let task = PriorityTask::positioned(GENERATION_CLASS, tile.centroid(), move || {
        if let Some(tile) = weak.upgrade() {
            pass(&tile);
        }
    })
    .with_cancellation(tile.cancellation().clone());

    tile.context().scheduler.submit(task)
}

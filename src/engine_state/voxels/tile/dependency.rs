//! # Dependency Barrier
//!
//! A join over a dependency set that is only discovered while the terrain pass
//! runs. Each needed neighbor gets a slot in an owned arena; resolving a slot
//! decrements a shared counter, and exactly one caller observes it reach zero.
//!
//! The counter starts at one. That extra count is held by the registering pass
//! and released by [`DependencyBarrier::seal`], so slots resolving while others
//! are still being registered can never reach zero early.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::TileCoord;

/// Index of a dependency slot within its barrier.
pub type SlotId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencySlot {
    pub coord: TileCoord,
    pub resolved: bool,
}

#[derive(Debug)]
pub struct DependencyBarrier {
    remaining: AtomicUsize,
    slots: Mutex<Vec<DependencySlot>>,
}

impl DependencyBarrier {
    pub fn new() -> Self {
        Self {
            remaining: AtomicUsize::new(1),
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Adds a neighbor the tile has to wait for.
    pub fn register(&self, coord: TileCoord) -> SlotId {
        let mut slots = self.slots.lock();
        self.remaining.fetch_add(1, Ordering::AcqRel);
        slots.push(DependencySlot {
            coord,
            resolved: false,
        });
        slots.len() - 1
    }

    /// Marks a slot resolved. Resolving a slot twice, or an unknown slot, is a
    /// no-op.
    ///
    /// # Returns
    /// `true` for exactly one caller: the one that released the last count.
    pub fn resolve(&self, slot: SlotId) -> bool {
        {
            let mut slots = self.slots.lock();
            match slots.get_mut(slot) {
                Some(entry) if !entry.resolved => entry.resolved = true,
                _ => return false,
            }
        }
        self.release()
    }

    /// Releases the registration count. Call once, after the last `register`.
    ///
    /// # Returns
    /// `true` if every slot was already resolved.
    pub fn seal(&self) -> bool {
        self.release()
    }

    fn release(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Outstanding counts, including the registration count until sealed.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Coordinates of neighbors not yet resolved.
    pub fn pending(&self) -> Vec<TileCoord> {
        self.slots
            .lock()
            .iter()
            .filter(|slot| !slot.resolved)
            .map(|slot| slot.coord)
            .collect()
    }

    pub fn slots(&self) -> Vec<DependencySlot> {
        self.slots.lock().clone()
    }
}

impl Default for DependencyBarrier {
    fn default() -> Self {
        Self::new()
    }
}

//! # Voxel World
//!
//! This module contains the tile grid and everything that generates it.
//!
//! ## Architecture
//!
//! * **Block**: Block types and the read-only property catalog
//! * **Terrain**: The density collaborator and the shaper that turns density into material
//! * **Tile**: Fixed-size voxel boxes and their generation state machine
//! * **Grid**: Thread-safe coordinate index, creating tiles on demand
//! * **Tasks**: The scheduled generation passes (terrain, then surface)
//!
//! ## Data Flow
//!
//! 1. The grid creates a tile lazily and initializes it
//! 2. The tile queues its terrain pass on the priority scheduler
//! 3. Passes look up (or create) neighbors through the grid and wait for them
//! 4. Phase completions are published to the main thread through the dispatcher
//!
//! ## Thread Safety
//!
//! * The grid index is a reader-writer lock; lookups never block each other
//! * Tile payloads are behind their own reader-writer lock
//! * Tile stage and phase counters are atomics, advanced by compare-and-swap

pub mod block;
pub mod grid;
pub mod tasks;
pub mod terrain;
pub mod tile;

//! # Tile Generation State
//!
//! The explicit state machine a tile moves through while it generates:
//!
//! ```text
//! Unstarted -> Generating -> AwaitingDependencies -> Decorating -> Ready
//!                   \_________________ sparse ________________/
//! any state except Evicted -> Evicted
//! ```
//!
//! Transitions are single compare-and-swap operations against the table in
//! [`GenerationStage::can_transition`], so a stage can never move backwards
//! and no stage is entered twice.

use std::sync::atomic::{AtomicU8, Ordering};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Generation phases whose completion consumers can wait for with
/// `Tile::invoke_after`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Raw terrain (density to material) and the heightmap are available.
    Terrain = 0,
    /// Surface decoration is applied; the tile is ready for meshing.
    Surface = 1,
}

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [Phase::Terrain, Phase::Surface];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Number of generation phases.
pub const PHASE_COUNT: usize = 2;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum GenerationStage {
    Unstarted,
    /// The terrain pass is queued or running.
    Generating,
    /// Terrain is done; waiting for vertical neighbors to finish theirs.
    AwaitingDependencies,
    /// The surface pass is running.
    Decorating,
    Ready,
    /// Removed from the grid. Terminal.
    Evicted,
}

impl GenerationStage {
    /// The transition table. Anything not listed here is rejected.
    pub fn can_transition(self, to: GenerationStage) -> bool {
        use GenerationStage::*;

        matches!(
            (self, to),
            (Unstarted, Generating)
                | (Generating, AwaitingDependencies)
                | (Generating, Ready)
                | (AwaitingDependencies, Decorating)
                | (Decorating, Ready)
                | (Unstarted | Generating | AwaitingDependencies | Decorating | Ready, Evicted)
        )
    }
}

/// Atomic holder for a [`GenerationStage`].
#[derive(Debug)]
pub struct StageCell(AtomicU8);

impl StageCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(GenerationStage::Unstarted as u8))
    }

    pub fn get(&self) -> GenerationStage {
        // Only valid discriminants are ever stored.
        GenerationStage::from_u8(self.0.load(Ordering::Acquire)).unwrap_or(GenerationStage::Evicted)
    }

    /// Moves from `from` to `to` if the cell currently holds `from` and the
    /// table allows it.
    ///
    /// # Returns
    /// `Err` with the actual current stage if the transition was rejected.
    pub fn transition(
        &self,
        from: GenerationStage,
        to: GenerationStage,
    ) -> Result<(), GenerationStage> {
        if !from.can_transition(to) {
            return Err(self.get());
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| GenerationStage::from_u8(actual).unwrap_or(GenerationStage::Evicted))
    }

    /// Moves to [`GenerationStage::Evicted`] from wherever the cell is.
    ///
    /// # Returns
    /// The stage the tile was in, or `None` if it was already evicted.
    pub fn evict(&self) -> Option<GenerationStage> {
        let previous = self.0.swap(GenerationStage::Evicted as u8, Ordering::AcqRel);
        GenerationStage::from_u8(previous).filter(|stage| *stage != GenerationStage::Evicted)
    }
}

impl Default for StageCell {
    fn default() -> Self {
        Self::new()
    }
}

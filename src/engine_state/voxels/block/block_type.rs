//! # Block Type Module
//!
//! This module defines the different types of blocks in the voxel world.
//! It provides conversion from the compact storage representation.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::BlockTypeSize;

/// Enumerates all possible block types in the voxel world.
///
/// The `FromPrimitive` derive allows conversion from the compact
/// [`BlockTypeSize`] stored in tile payloads.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, Serialize, Deserialize)]
pub enum BlockType {
    /// Empty space. Non-solid and transparent.
    #[default]
    Air,
    Stone,
    Dirt,
    /// Topmost decorated cell of a column exposed to air.
    Grass,
    /// Decoration used near sea level.
    Sand,
    /// Decoration used beneath water.
    Gravel,
    Water,
    Lava,
}

impl BlockType {
    pub const ALL: [BlockType; 8] = [
        BlockType::Air,
        BlockType::Stone,
        BlockType::Dirt,
        BlockType::Grass,
        BlockType::Sand,
        BlockType::Gravel,
        BlockType::Water,
        BlockType::Lava,
    ];

    /// Converts a stored `BlockTypeSize` back into a `BlockType`.
    ///
    /// # Returns
    /// `None` if the value does not name a block type.
    pub fn from_storage(value: BlockTypeSize) -> Option<Self> {
        BlockType::from_u8(value)
    }

    pub fn to_storage(self) -> BlockTypeSize {
        self as BlockTypeSize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_values_convert_back() {
        for block in BlockType::ALL {
            assert_eq!(BlockType::from_storage(block.to_storage()), Some(block));
        }
        assert_eq!(BlockType::from_storage(200), None);
    }
}

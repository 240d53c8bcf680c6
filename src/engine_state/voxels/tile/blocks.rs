//! # Tile Payload
//!
//! Block storage for a non-sparse tile.
//!
//! ## Layout
//! - `blocks`: One [`BlockTypeSize`] per cell, ordered x, then z, then y
//! - `solid`: A bit vector (1 bit per cell) mirroring the registry's `is_solid`,
//!   so occlusion checks never touch the registry
//! - `heightmap`: Per column (x, z), the local y of the highest solid cell
//!
//! Sparse tiles have no payload at all. [`TileBlocksBuilder`] only allocates
//! once the first non-air block is pushed, so an all-air tile never allocates.

use bitvec::prelude::BitVec;
use cgmath::{Point3, Vector3};

use crate::engine_state::voxels::block::{block_type::BlockType, BlockRegistry, BlockTypeSize};

/// Dense block storage for one tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileBlocks {
    extent: Vector3<i32>,
    blocks: Vec<BlockTypeSize>,
    solid: BitVec,
    heightmap: Vec<Option<u16>>,
}

impl TileBlocks {
    fn filled(extent: Vector3<i32>, block: BlockType, registry: &dyn BlockRegistry) -> Self {
        let volume = (extent.x * extent.y * extent.z) as usize;
        let columns = (extent.x * extent.z) as usize;
        let solid = registry.is_solid(block);
        let top = (extent.y - 1) as u16;

        Self {
            extent,
            blocks: vec![block.to_storage(); volume],
            solid: BitVec::repeat(solid, volume),
            heightmap: vec![solid.then_some(top); columns],
        }
    }

    pub fn extent(&self) -> Vector3<i32> {
        self.extent
    }

    /// Returns `true` if `local` lies inside the tile.
    pub fn contains(&self, local: Point3<i32>) -> bool {
        (0..self.extent.x).contains(&local.x)
            && (0..self.extent.y).contains(&local.y)
            && (0..self.extent.z).contains(&local.z)
    }

    fn index(&self, local: Point3<i32>) -> usize {
        (local.x + local.z * self.extent.x + local.y * self.extent.x * self.extent.z) as usize
    }

    fn column(&self, x: i32, z: i32) -> usize {
        (x + z * self.extent.x) as usize
    }

    /// Block at a tile-local position. Positions outside the tile read as air.
    pub fn get(&self, local: Point3<i32>) -> BlockType {
        if self.contains(local) {
            BlockType::from_storage(self.blocks[self.index(local)]).unwrap_or_default()
        } else {
            BlockType::Air
        }
    }

    /// O(1) solidity check. Positions outside the tile are not solid.
    pub fn is_solid(&self, local: Point3<i32>) -> bool {
        self.contains(local) && self.solid[self.index(local)]
    }

    /// Replaces a block, keeping the solidity mask and heightmap in sync.
    ///
    /// # Returns
    /// The previous block, or `None` if `local` is outside the tile.
    pub fn set(
        &mut self,
        local: Point3<i32>,
        block: BlockType,
        registry: &dyn BlockRegistry,
    ) -> Option<BlockType> {
        if !self.contains(local) {
            return None;
        }

        let index = self.index(local);
        let previous = std::mem::replace(&mut self.blocks[index], block.to_storage());
        let solid = registry.is_solid(block);
        self.solid.set(index, solid);

        let column = self.column(local.x, local.z);
        let y = local.y as u16;
        let current = self.heightmap[column];
        match current {
            Some(top) if solid && y <= top => {}
            _ if solid => self.heightmap[column] = Some(y),
            Some(top) if top == y => {
                self.heightmap[column] = (0..local.y)
                    .rev()
                    .find(|below| self.is_solid(Point3::new(local.x, *below, local.z)))
                    .map(|below| below as u16);
            }
            _ => {}
        }

        Some(BlockType::from_storage(previous).unwrap_or_default())
    }

    /// Local y of the highest solid cell in column (x, z).
    pub fn surface_height(&self, x: i32, z: i32) -> Option<i32> {
        if !(0..self.extent.x).contains(&x) || !(0..self.extent.z).contains(&z) {
            return None;
        }
        self.heightmap[self.column(x, z)].map(i32::from)
    }

    fn layer_has_solid(&self, y: i32) -> bool {
        let plane = (self.extent.x * self.extent.z) as usize;
        let start = y as usize * plane;
        self.solid[start..start + plane].any()
    }

    /// Returns `true` if any cell of the topmost layer is solid.
    pub fn top_layer_has_solid(&self) -> bool {
        self.layer_has_solid(self.extent.y - 1)
    }

    /// Returns `true` if any cell of the bottom layer is solid.
    pub fn bottom_layer_has_solid(&self) -> bool {
        self.layer_has_solid(0)
    }

    pub fn solid_count(&self) -> usize {
        self.solid.count_ones()
    }

    /// Iterates over every tile-local position, in storage order.
    pub fn positions(&self) -> impl Iterator<Item = Point3<i32>> {
        let extent = self.extent;
        (0..extent.y).flat_map(move |y| {
            (0..extent.z).flat_map(move |z| (0..extent.x).map(move |x| Point3::new(x, y, z)))
        })
    }
}

/// Builds a [`TileBlocks`] cell by cell in storage order, allocating lazily.
///
/// # Examples
/// ```
/// use cgmath::Vector3;
/// use tile_scheduler::engine_state::voxels::block::{block_type::BlockType, DefaultBlockRegistry};
/// use tile_scheduler::engine_state::voxels::tile::blocks::TileBlocksBuilder;
///
/// let mut builder = TileBlocksBuilder::new(Vector3::new(2, 2, 2));
/// for _ in 0..8 {
///     builder.push(BlockType::Air, &DefaultBlockRegistry);
/// }
/// assert!(builder.finish().is_none());
/// ```
pub struct TileBlocksBuilder {
    extent: Vector3<i32>,
    blocks: Option<TileBlocks>,
    cursor: Point3<i32>,
    pushed: usize,
}

impl TileBlocksBuilder {
    pub fn new(extent: Vector3<i32>) -> Self {
        Self {
            extent,
            blocks: None,
            cursor: Point3::new(0, 0, 0),
            pushed: 0,
        }
    }

    /// The tile-local position the next pushed block lands on.
    pub fn cursor(&self) -> Point3<i32> {
        self.cursor
    }

    /// Appends the block at [`cursor`](Self::cursor) and advances the cursor.
    pub fn push(&mut self, block: BlockType, registry: &dyn BlockRegistry) {
        if block != BlockType::Air || self.blocks.is_some() {
            let extent = self.extent;
            let blocks = self
                .blocks
                .get_or_insert_with(|| TileBlocks::filled(extent, BlockType::Air, registry));
            blocks.set(self.cursor, block, registry);
        }

        self.pushed += 1;
        self.cursor.x += 1;
        if self.cursor.x == self.extent.x {
            self.cursor.x = 0;
            self.cursor.z += 1;
            if self.cursor.z == self.extent.z {
                self.cursor.z = 0;
                self.cursor.y += 1;
            }
        }
    }

    /// Returns the payload, or `None` if every pushed block was air.
    pub fn finish(self) -> Option<TileBlocks> {
        debug_assert_eq!(
            self.pushed,
            (self.extent.x * self.extent.y * self.extent.z) as usize,
            "tile payload built with the wrong number of cells"
        );
        self.blocks
    }
}

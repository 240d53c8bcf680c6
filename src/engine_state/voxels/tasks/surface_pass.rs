//! # Surface Pass
//!
//! The second generation phase. Runs once every neighbor the terrain pass
//! registered has finished its own terrain, and replaces exposed stone with
//! surface materials.
//!
//! ## Rules
//! Each column is walked downward from its heightmap top. A solid cell whose
//! block above is not solid starts a run of `surface_layers` cells:
//! - Beneath air: grass then dirt, or sand within `beach_height` of sea level
//! - Beneath water: gravel
//! - Beneath lava: left as stone
//!
//! Afterwards, sand with nothing solid beneath it becomes stone. The block
//! above the top layer and beneath the bottom layer come from the vertical
//! neighbors; a missing neighbor reads as air.

use std::sync::Arc;

use cgmath::{Point3, Vector3};
use web_time::Instant;

use super::schedule_pass;
use crate::engine_state::{
    config::TerrainConfig,
    task_management::task::TaskHandle,
    voxels::{
        block::{block_type::BlockType, BlockRegistry},
        tile::{
            blocks::TileBlocks,
            state::{GenerationStage, Phase},
            Tile,
        },
    },
};

/// Material family applied to an exposed surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cover {
    Grass,
    Sand,
    Gravel,
    Bare,
}

impl Cover {
    fn for_exposure(above: BlockType, surface_y: i32, config: &TerrainConfig) -> Self {
        match above {
            BlockType::Water => Cover::Gravel,
            BlockType::Lava => Cover::Bare,
            _ if (surface_y - config.sea_level).abs() <= config.beach_height => Cover::Sand,
            _ => Cover::Grass,
        }
    }

    /// Block for the cell `depth` cells below the exposed surface.
    fn block(self, depth: u32) -> Option<BlockType> {
        match self {
            Cover::Grass if depth == 0 => Some(BlockType::Grass),
            Cover::Grass => Some(BlockType::Dirt),
            Cover::Sand => Some(BlockType::Sand),
            Cover::Gravel => Some(BlockType::Gravel),
            Cover::Bare => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnSeam {
    /// Block directly above the column's top cell.
    above: BlockType,
    /// A run started in the tile above that continues into this one.
    carried: Option<(Cover, u32)>,
    /// Whether the block directly beneath the column's bottom cell is solid.
    below_solid: bool,
}

/// What the surface pass needs to know about the vertical neighbors, per column.
pub(crate) struct Seams {
    width: i32,
    columns: Vec<ColumnSeam>,
}

impl Seams {
    /// Seams of a tile with no neighbors at all.
    pub(crate) fn open(extent: Vector3<i32>) -> Self {
        Self {
            width: extent.x,
            columns: vec![
                ColumnSeam {
                    above: BlockType::Air,
                    carried: None,
                    below_solid: false,
                };
                (extent.x * extent.z) as usize
            ],
        }
    }

    /// Reads the neighbors' seam layers. Takes each neighbor's read lock in
    /// turn and never holds a lock on `tile` itself.
    fn gather(tile: &Tile) -> Self {
        let context = tile.context();
        let extent = context.grid_config.tile_extent();
        let registry = context.registry.as_ref();
        let config = context.shaper.config();
        let mut seams = Self::open(extent);

        let Some(grid) = tile.grid() else {
            return seams;
        };

        if let Some(above) = grid.get_tile_if_exists(tile.coord() + Vector3::new(0, 1, 0)) {
            let above_origin_y = above.world_origin().y;
            above.with_blocks(|blocks| {
                let Some(blocks) = blocks else {
                    return;
                };
                for z in 0..extent.z {
                    for x in 0..extent.x {
                        let seam = &mut seams.columns[(x + z * extent.x) as usize];
                        seam.above = blocks.get(Point3::new(x, 0, z));
                        seam.carried =
                            carried_run(blocks, x, z, above_origin_y, config, registry);
                    }
                }
            });
        }

        if let Some(below) = grid.get_tile_if_exists(tile.coord() + Vector3::new(0, -1, 0)) {
            below.with_blocks(|blocks| {
                let Some(blocks) = blocks else {
                    return;
                };
                let top = blocks.extent().y - 1;
                for z in 0..extent.z {
                    for x in 0..extent.x {
                        seams.columns[(x + z * extent.x) as usize].below_solid =
                            blocks.is_solid(Point3::new(x, top, z));
                    }
                }
            });
        }

        seams
    }

    fn column(&self, x: i32, z: i32) -> &ColumnSeam {
        &self.columns[(x + z * self.width) as usize]
    }
}

/// Finds a surface run in the bottom cells of the tile above that is still
/// going when it reaches the seam.
fn carried_run(
    above: &TileBlocks,
    x: i32,
    z: i32,
    above_origin_y: i32,
    config: &TerrainConfig,
    registry: &dyn BlockRegistry,
) -> Option<(Cover, u32)> {
    let scan = above.extent().y.min(config.surface_layers as i32);
    let mut depth = 0;
    for y in 0..scan {
        let cell = above.get(Point3::new(x, y, z));
        if registry.is_solid(cell) {
            depth += 1;
            continue;
        }
        if depth == 0 {
            return None;
        }
        let surface_y = above_origin_y + y - 1;
        return Some((Cover::for_exposure(cell, surface_y, config), depth));
    }
    None
}

/// Applies the surface rules to a tile payload.
pub(crate) fn decorate(
    blocks: &mut TileBlocks,
    seams: &Seams,
    origin_y: i32,
    config: &TerrainConfig,
    registry: &dyn BlockRegistry,
) {
    let extent = blocks.extent();
    let top_layer = extent.y - 1;
    let up = Vector3::new(0, 1, 0);

    for z in 0..extent.z {
        for x in 0..extent.x {
            let seam = seams.column(x, z);
            let Some(top) = blocks.surface_height(x, z) else {
                continue;
            };

            let mut run = if top == top_layer { seam.carried } else { None };
            for y in (0..=top).rev() {
                let local = Point3::new(x, y, z);
                let cell = blocks.get(local);
                if !registry.is_solid(cell) {
                    run = None;
                    continue;
                }

                let above = if y == top_layer {
                    seam.above
                } else {
                    blocks.get(local + up)
                };
                if !registry.is_solid(above) {
                    run = Some((Cover::for_exposure(above, origin_y + y, config), 0));
                }

                run = match run {
                    Some((cover, depth)) if depth < config.surface_layers => {
                        if cell == BlockType::Stone {
                            if let Some(block) = cover.block(depth) {
                                blocks.set(local, block, registry);
                            }
                        }
                        Some((cover, depth + 1))
                    }
                    _ => None,
                };
            }

            for y in 0..=top {
                let local = Point3::new(x, y, z);
                if blocks.get(local) != BlockType::Sand {
                    continue;
                }
                let supported = if y == 0 {
                    seam.below_solid
                } else {
                    blocks.is_solid(local - up)
                };
                if !supported {
                    blocks.set(local, BlockType::Stone, registry);
                }
            }
        }
    }
}

pub struct SurfacePass;

impl SurfacePass {
    /// Queues the surface pass for `tile`.
    pub(crate) fn schedule(tile: &Arc<Tile>) -> TaskHandle {
        schedule_pass(tile, Self::process)
    }

    fn process(tile: &Arc<Tile>) {
        if tile.cancellation().is_cancelled() {
            return;
        }
        if !tile.transition(GenerationStage::AwaitingDependencies, GenerationStage::Decorating) {
            return;
        }
        let context = tile.context();
        tile.record(|timeline| timeline.surface_started = Some(Instant::now()));
        context.stats.record_decoration_pass();

        let seams = Seams::gather(tile);
        {
            let mut blocks = tile.blocks().get_mut();
            if let Some(blocks) = blocks.as_mut() {
                decorate(
                    blocks,
                    &seams,
                    tile.world_origin().y,
                    context.shaper.config(),
                    context.registry.as_ref(),
                );
            }
        }

        if !tile.transition(GenerationStage::Decorating, GenerationStage::Ready) {
            return;
        }
        context.stats.record_tile_ready();
        tile.complete_phase(Phase::Surface);
        tile.notify_neighbors();
    }
}

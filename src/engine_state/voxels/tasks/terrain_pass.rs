//! # Terrain Pass
//!
//! The first generation phase. Fills the tile from the terrain collaborator,
//! builds its heightmap, then works out which vertical neighbors the surface
//! pass will need and waits for them.

use std::sync::Arc;

use cgmath::{EuclideanSpace, Point3, Vector3};
use log::trace;
use web_time::Instant;

use super::{schedule_pass, surface_pass::SurfacePass};
use crate::engine_state::{
    errors::GridError,
    task_management::task::TaskHandle,
    voxels::{
        block::BlockRegistry,
        terrain::TerrainShaper,
        tile::{
            blocks::{TileBlocks, TileBlocksBuilder},
            state::{GenerationStage, Phase},
            Tile,
        },
    },
};

pub struct TerrainPass;

impl TerrainPass {
    /// Queues the terrain pass for `tile`.
    pub(crate) fn schedule(tile: &Arc<Tile>) -> TaskHandle {
        schedule_pass(tile, Self::process)
    }

    /// Generates the payload of the tile whose minimum corner is `origin`.
    ///
    /// # Returns
    /// `None` if every cell is air.
    pub fn generate(
        shaper: &TerrainShaper,
        registry: &dyn BlockRegistry,
        origin: Point3<i32>,
        extent: Vector3<i32>,
    ) -> Option<TileBlocks> {
        let heights: Vec<Option<i32>> = (0..extent.z)
            .flat_map(|z| (0..extent.x).map(move |x| (x, z)))
            .map(|(x, z)| shaper.column_height(origin.x + x, origin.z + z))
            .collect();

        let mut builder = TileBlocksBuilder::new(extent);
        for _ in 0..extent.x * extent.y * extent.z {
            let local = builder.cursor();
            let column_height = heights[(local.x + local.z * extent.x) as usize];
            let block = shaper.block_at(origin + local.to_vec(), column_height);
            builder.push(block, registry);
        }
        builder.finish()
    }

    fn process(tile: &Arc<Tile>) {
        if tile.cancellation().is_cancelled() {
            return;
        }
        let context = tile.context();
        context.stats.record_terrain_pass();
        tile.record(|timeline| timeline.terrain_started = Some(Instant::now()));

        let payload = Self::generate(
            &context.shaper,
            context.registry.as_ref(),
            tile.world_origin(),
            context.grid_config.tile_extent(),
        );
        if tile.cancellation().is_cancelled() {
            return;
        }

        match payload {
            None => {
                tile.set_sparse(true);
                if !tile.transition(GenerationStage::Generating, GenerationStage::Ready) {
                    return;
                }
                context.stats.record_sparse_tile();
                context.stats.record_tile_ready();
                tile.complete_phase(Phase::Terrain);
                tile.complete_phase(Phase::Surface);
                tile.notify_neighbors();
            }
            Some(blocks) => {
                let needs_above = blocks.top_layer_has_solid();
                let needs_below = blocks.bottom_layer_has_solid();
                *tile.blocks().get_mut() = Some(blocks);

                if !tile.transition(GenerationStage::Generating, GenerationStage::AwaitingDependencies) {
                    return;
                }
                tile.complete_phase(Phase::Terrain);
                Self::register_dependencies(tile, needs_above, needs_below);
            }
        }
    }

    /// Registers the vertical neighbors the surface pass reads, then seals the
    /// barrier. Whoever releases its last count queues the surface pass.
    fn register_dependencies(tile: &Arc<Tile>, needs_above: bool, needs_below: bool) {
        if let Some(grid) = tile.grid() {
            for (needed, dy) in [(needs_above, 1), (needs_below, -1)] {
                if !needed {
                    continue;
                }
                let coord = tile.coord() + Vector3::new(0, dy, 0);
                match grid.get_or_create_tile(coord) {
                    Ok((_, neighbor)) => {
                        let slot = tile.barrier().register(coord);
                        if !neighbor.add_dependent(tile.coord(), slot) {
                            tile.resolve_dependency(slot);
                        }
                    }
                    Err(GridError::OutOfBounds(_)) => {
                        trace!("Tile {:?}: no neighbor at {:?}, skipping", tile.coord(), coord);
                    }
                }
            }
        }

        if tile.barrier().seal() {
            SurfacePass::schedule(tile);
        }
    }
}

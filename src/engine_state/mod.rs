//! # Engine State Module
//!
//! The engine: a priority scheduler, a tile grid generated on it, and the
//! main-thread dispatcher that publishes finished phases to the consumer.
//!
//! ## Key Components
//!
//! * `EngineState` - Owns the subsystems and drives them from the main thread
//! * `config` - Serde-backed configuration for every subsystem
//! * `errors` - Error types
//! * `rendering` - The mesh-building interface called for finished tiles
//! * `task_management` - The priority scheduler and its worker threads
//! * `voxels` - Blocks, terrain, tiles and the grid
//!
//! ## Threading
//!
//! `EngineState` is created on, and must be ticked from, the main thread.
//! Generation runs on the scheduler's workers; everything touching meshes
//! runs inside [`EngineState::update`].

use std::sync::Arc;

use cgmath::{Point3, Vector3};
use log::{debug, info};

use config::EngineConfig;
use errors::{DispatchError, EngineError};
use rendering::MeshBuilder;
use task_management::PriorityScheduler;
use voxels::{
    block::{block_type::BlockType, BlockRegistry},
    grid::{GenerationContext, GenerationStatsSnapshot, Grid},
    terrain::{DensityField, TerrainShaper},
    tile::{split_world_position, TileCoord},
};

use crate::core::MainThreadDispatcher;

pub mod config;
pub mod errors;
pub mod rendering;
pub mod task_management;
pub mod voxels;

/// What one [`EngineState::update`] tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Main-thread callbacks run (mesh builds among them).
    pub callbacks_run: usize,
    /// Dirty tiles whose rebuild was queued.
    pub rebuilds_queued: usize,
}

/// The main state container of the engine.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use cgmath::Point3;
/// use tile_scheduler::engine_state::{config::EngineConfig, EngineState};
/// use tile_scheduler::engine_state::rendering::FaceCountMesher;
/// use tile_scheduler::engine_state::voxels::{block::DefaultBlockRegistry, terrain::NoiseTerrain};
///
/// let config = EngineConfig::default();
/// let field = Arc::new(NoiseTerrain::new(&config.terrain));
/// let mesher = Arc::new(FaceCountMesher::new(Arc::new(DefaultBlockRegistry)));
/// let mut engine = EngineState::new(config, field, Arc::new(DefaultBlockRegistry), mesher).unwrap();
///
/// engine.set_observer_position(Point3::new(0.0, 8.0, 0.0));
/// engine.update().unwrap();
/// ```
pub struct EngineState {
    config: EngineConfig,
    scheduler: Arc<PriorityScheduler>,
    dispatcher: Arc<MainThreadDispatcher>,
    grid: Arc<Grid>,
    mesher: Arc<dyn MeshBuilder>,
    observer_tile: Option<TileCoord>,
}

impl EngineState {
    /// Builds the engine and starts the scheduler's workers. The calling thread
    /// becomes the main thread.
    ///
    /// # Arguments
    /// * `config` - Validated before anything starts
    /// * `field` - Terrain density collaborator
    /// * `registry` - Block property catalog
    /// * `mesher` - Called on the main thread for every finished tile
    pub fn new(
        config: EngineConfig,
        field: Arc<dyn DensityField>,
        registry: Arc<dyn BlockRegistry>,
        mesher: Arc<dyn MeshBuilder>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let scheduler = Arc::new(PriorityScheduler::new(config.scheduler.clone())?);
        let dispatcher = Arc::new(MainThreadDispatcher::new());
        let shaper = TerrainShaper::new(field, config.terrain.clone());
        let context = GenerationContext::new(
            scheduler.clone(),
            dispatcher.clone(),
            shaper,
            registry,
            config.grid.clone(),
        );
        let grid = Grid::new(Arc::new(context));

        info!(
            "Engine ready: {}x{}x{} tiles, load radius {}",
            config.grid.tile_width, config.grid.tile_height, config.grid.tile_width, config.load_radius
        );

        Ok(Self {
            config,
            scheduler,
            dispatcher,
            grid,
            mesher,
            observer_tile: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<PriorityScheduler> {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Arc<MainThreadDispatcher> {
        &self.dispatcher
    }

    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    pub fn stats(&self) -> GenerationStatsSnapshot {
        self.grid.context().stats.snapshot()
    }

    /// Moves the observer. Queued work is re-scored by the scheduler's
    /// throttle; entering a new tile requests every tile within the load radius.
    ///
    /// # Returns
    /// The number of tiles newly created by this call.
    pub fn set_observer_position(&mut self, position: Point3<f32>) -> usize {
        self.scheduler.set_observer_position(position);

        let world = Point3::new(
            position.x.floor() as i32,
            position.y.floor() as i32,
            position.z.floor() as i32,
        );
        let (tile, _) = split_world_position(world, self.config.grid.tile_extent());
        if self.observer_tile == Some(tile) {
            return 0;
        }
        self.observer_tile = Some(tile);
        self.request_tiles_around(tile)
    }

    pub fn observer_tile(&self) -> Option<TileCoord> {
        self.observer_tile
    }

    /// Creates every missing tile within the load radius of `center` and
    /// queues a mesh build for it.
    ///
    /// # Returns
    /// The number of tiles created.
    pub fn request_tiles_around(&self, center: TileCoord) -> usize {
        let radius = self.config.load_radius;
        let mut created = 0;
        for dy in -radius..=radius {
            for dz in -radius..=radius {
                for dx in -radius..=radius {
                    if self.request_tile(center + Vector3::new(dx, dy, dz)) {
                        created += 1;
                    }
                }
            }
        }
        if created > 0 {
            debug!("Requested {} new tiles around {:?}", created, center);
        }
        created
    }

    /// Ensures the tile at `coord` exists and will be meshed once generated.
    ///
    /// # Returns
    /// `true` if the tile was created by this call.
    pub fn request_tile(&self, coord: TileCoord) -> bool {
        match self.grid.get_or_create_tile(coord) {
            Ok((existed, tile)) => {
                // Tiles created as someone's dependency get their first mesh
                // build here, the first time they are requested.
                tile.request_mesh(self.mesher.clone());
                !existed
            }
            Err(_) => false,
        }
    }

    /// Removes every tile further than `radius` tiles (on any axis) from the
    /// observer's tile.
    pub fn unload_beyond(&self, radius: i32) -> usize {
        let Some(center) = self.observer_tile else {
            return 0;
        };
        self.grid.retain_tiles(|coord| {
            (coord.x - center.x).abs() <= radius
                && (coord.y - center.y).abs() <= radius
                && (coord.z - center.z).abs() <= radius
        })
    }

    /// The main-thread tick: runs queued phase callbacks and rebuilds dirty tiles.
    pub fn update(&mut self) -> Result<UpdateSummary, DispatchError> {
        let callbacks_run = self.dispatcher.run_pending()?;

        let mut rebuilds_queued = 0;
        for coord in self.grid.context().take_dirty() {
            let Some(tile) = self.grid.get_tile_if_exists(coord) else {
                continue;
            };
            // A build that is already queued runs after the change that made
            // the tile dirty, so a rejected rebuild loses nothing.
            if tile.rebuild(self.mesher.clone()) {
                rebuilds_queued += 1;
            }
        }

        Ok(UpdateSummary {
            callbacks_run,
            rebuilds_queued,
        })
    }

    /// Block at a world position. Tiles that do not exist read as air.
    pub fn block_at(&self, world: Point3<i32>) -> BlockType {
        self.grid.block_at(world)
    }

    pub fn queued_task_count(&self) -> usize {
        self.scheduler.queued_task_count()
    }
}

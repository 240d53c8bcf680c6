//! # Grid Module
//!
//! The `Grid` is the thread-safe index from tile coordinate to [`Tile`], and the
//! rendezvous point tiles use to find (or create) the neighbors they depend on.
//!
//! ## Locking
//!
//! The index sits behind a `parking_lot::RwLock`:
//! - Lookups (`get_tile_if_exists`, `block_at`) take a shared read lock
//! - `get_or_create_tile` first tries a plain read; on a miss it takes an
//!   upgradable read, re-checks, and only then upgrades to a write lock, so the
//!   common "tile already exists" path never waits behind writers
//! - `remove_tiles` takes the write lock, but disposes evicted tiles only after
//!   releasing it (disposal looks tiles up again)
//!
//! A coordinate maps to at most one live tile at a time.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use cgmath::Point3;
use log::debug;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};

use super::block::{block_type::BlockType, BlockRegistry};
use super::terrain::TerrainShaper;
use super::tile::{split_world_position, Tile, TileCoord};
use crate::core::MainThreadDispatcher;
use crate::engine_state::config::GridConfig;
use crate::engine_state::errors::GridError;
use crate::engine_state::task_management::PriorityScheduler;

/// Counters describing generation progress.
#[derive(Debug, Default)]
pub struct GenerationStats {
    tiles_created: AtomicUsize,
    terrain_passes: AtomicUsize,
    decoration_passes: AtomicUsize,
    sparse_tiles: AtomicUsize,
    tiles_ready: AtomicUsize,
    tiles_evicted: AtomicUsize,
}

/// A point-in-time copy of [`GenerationStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerationStatsSnapshot {
    pub tiles_created: usize,
    pub terrain_passes: usize,
    pub decoration_passes: usize,
    pub sparse_tiles: usize,
    pub tiles_ready: usize,
    pub tiles_evicted: usize,
}

impl GenerationStats {
    pub(crate) fn record_tile_created(&self) {
        self.tiles_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_terrain_pass(&self) {
        self.terrain_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decoration_pass(&self) {
        self.decoration_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sparse_tile(&self) {
        self.sparse_tiles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tile_ready(&self) {
        self.tiles_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tile_evicted(&self) {
        self.tiles_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GenerationStatsSnapshot {
        GenerationStatsSnapshot {
            tiles_created: self.tiles_created.load(Ordering::Relaxed),
            terrain_passes: self.terrain_passes.load(Ordering::Relaxed),
            decoration_passes: self.decoration_passes.load(Ordering::Relaxed),
            sparse_tiles: self.sparse_tiles.load(Ordering::Relaxed),
            tiles_ready: self.tiles_ready.load(Ordering::Relaxed),
            tiles_evicted: self.tiles_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Everything a tile needs to generate itself, shared by every tile of a grid.
pub struct GenerationContext {
    pub scheduler: Arc<PriorityScheduler>,
    pub dispatcher: Arc<MainThreadDispatcher>,
    pub shaper: TerrainShaper,
    pub registry: Arc<dyn BlockRegistry>,
    pub grid_config: GridConfig,
    pub stats: GenerationStats,
    dirty: Mutex<Vec<TileCoord>>,
}

impl GenerationContext {
    pub fn new(
        scheduler: Arc<PriorityScheduler>,
        dispatcher: Arc<MainThreadDispatcher>,
        shaper: TerrainShaper,
        registry: Arc<dyn BlockRegistry>,
        grid_config: GridConfig,
    ) -> Self {
        Self {
            scheduler,
            dispatcher,
            shaper,
            registry,
            grid_config,
            stats: GenerationStats::default(),
            dirty: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_dirty(&self, coord: TileCoord) {
        self.dirty.lock().push(coord);
    }

    /// Takes every tile coordinate marked dirty since the last call.
    pub fn take_dirty(&self) -> Vec<TileCoord> {
        std::mem::take(&mut *self.dirty.lock())
    }
}

/// Thread-safe map from tile coordinate to tile.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use cgmath::Point3;
/// use tile_scheduler::core::MainThreadDispatcher;
/// use tile_scheduler::engine_state::config::{GridConfig, SchedulerConfig, TerrainConfig};
/// use tile_scheduler::engine_state::task_management::PriorityScheduler;
/// use tile_scheduler::engine_state::voxels::block::DefaultBlockRegistry;
/// use tile_scheduler::engine_state::voxels::grid::{GenerationContext, Grid};
/// use tile_scheduler::engine_state::voxels::terrain::{FnDensity, TerrainShaper};
///
/// let scheduler = Arc::new(PriorityScheduler::new(SchedulerConfig::default()).unwrap());
/// let shaper = TerrainShaper::new(Arc::new(FnDensity::new(|_, y, _| -y)), TerrainConfig::default());
/// let context = GenerationContext::new(
///     scheduler,
///     Arc::new(MainThreadDispatcher::new()),
///     shaper,
///     Arc::new(DefaultBlockRegistry),
///     GridConfig::default(),
/// );
/// let grid = Grid::new(Arc::new(context));
///
/// let (existed, tile) = grid.get_or_create_tile(Point3::new(0, 0, 0)).unwrap();
/// assert!(!existed);
/// assert!(grid.get_tile_if_exists(tile.coord()).is_some());
/// ```
pub struct Grid {
    tiles: RwLock<HashMap<TileCoord, Arc<Tile>>>,
    context: Arc<GenerationContext>,
}

impl Grid {
    pub fn new(context: Arc<GenerationContext>) -> Arc<Self> {
        Arc::new(Self {
            tiles: RwLock::new(HashMap::new()),
            context,
        })
    }

    pub fn context(&self) -> &Arc<GenerationContext> {
        &self.context
    }

    /// Returns the tile at `coord`, creating and initializing it on a miss.
    ///
    /// # Arguments
    /// * `coord` - Tile coordinate to look up
    ///
    /// # Returns
    /// `(existed, tile)`, where `existed` is `false` if this call created the
    /// tile, or [`GridError::OutOfBounds`] if `coord` lies outside the
    /// configured vertical bounds.
    pub fn get_or_create_tile(self: &Arc<Self>, coord: TileCoord) -> Result<(bool, Arc<Tile>), GridError> {
        if !self.context.grid_config.contains(coord) {
            return Err(GridError::OutOfBounds(coord));
        }

        if let Some(tile) = self.tiles.read().get(&coord) {
            return Ok((true, tile.clone()));
        }

        let tiles = self.tiles.upgradable_read();
        if let Some(tile) = tiles.get(&coord) {
            return Ok((true, tile.clone()));
        }
        let mut tiles = RwLockUpgradableReadGuard::upgrade(tiles);
        let tile = Arc::new(Tile::new(coord, self.context.clone(), Arc::downgrade(self)));
        tiles.insert(coord, tile.clone());
        drop(tiles);

        tile.initialize();
        Ok((false, tile))
    }

    /// Looks up a tile without ever creating one.
    pub fn get_tile_if_exists(&self, coord: TileCoord) -> Option<Arc<Tile>> {
        self.tiles.read().get(&coord).cloned()
    }

    /// Removes tiles from the index and disposes them.
    ///
    /// # Returns
    /// The number of tiles that were actually removed.
    pub fn remove_tiles(&self, coords: impl IntoIterator<Item = TileCoord>) -> usize {
        let removed: Vec<Arc<Tile>> = {
            let mut tiles = self.tiles.write();
            coords
                .into_iter()
                .filter_map(|coord| tiles.remove(&coord))
                .collect()
        };

        for tile in &removed {
            tile.dispose();
        }
        if !removed.is_empty() {
            debug!("Removed {} tiles from the grid", removed.len());
        }
        removed.len()
    }

    /// Removes every tile that does not satisfy `keep`.
    pub fn retain_tiles(&self, mut keep: impl FnMut(TileCoord) -> bool) -> usize {
        let doomed: Vec<TileCoord> = self
            .tiles
            .read()
            .keys()
            .copied()
            .filter(|coord| !keep(*coord))
            .collect();
        self.remove_tiles(doomed)
    }

    /// Block at a world position. Missing tiles read as air and are never
    /// created by this query.
    pub fn block_at(&self, world: Point3<i32>) -> BlockType {
        let (coord, local) = split_world_position(world, self.context.grid_config.tile_extent());
        self.get_tile_if_exists(coord)
            .map_or(BlockType::Air, |tile| tile.block_at_local(local))
    }

    pub fn is_solid_at(&self, world: Point3<i32>) -> bool {
        self.context.registry.is_solid(self.block_at(world))
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn coords(&self) -> Vec<TileCoord> {
        self.tiles.read().keys().copied().collect()
    }

    pub fn ready_tile_count(&self) -> usize {
        self.tiles.read().values().filter(|tile| tile.is_ready()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::config::{SchedulerConfig, TerrainConfig};
    use crate::engine_state::voxels::block::DefaultBlockRegistry;
    use crate::engine_state::voxels::terrain::FnDensity;
    use crate::engine_state::voxels::tile::state::GenerationStage;

    fn manual_grid(grid_config: GridConfig) -> (Arc<Grid>, Arc<PriorityScheduler>) {
        let scheduler = Arc::new(
            PriorityScheduler::new(SchedulerConfig {
                worker_count: Some(0),
                ..SchedulerConfig::default()
            })
            .unwrap(),
        );
        let shaper = TerrainShaper::new(
            Arc::new(FnDensity::new(|_, y, _| 8.0 - y)),
            TerrainConfig {
                sea_level: -100,
                lava_level: -200,
                ..TerrainConfig::default()
            },
        );
        let context = GenerationContext::new(
            scheduler.clone(),
            Arc::new(MainThreadDispatcher::new()),
            shaper,
            Arc::new(DefaultBlockRegistry),
            grid_config,
        );
        (Grid::new(Arc::new(context)), scheduler)
    }

    #[test]
    fn second_lookup_returns_the_same_tile() {
        let (grid, scheduler) = manual_grid(GridConfig::default());

        let (existed, first) = grid.get_or_create_tile(Point3::new(1, 0, -1)).unwrap();
        let (existed_again, second) = grid.get_or_create_tile(Point3::new(1, 0, -1)).unwrap();

        assert!(!existed);
        assert!(existed_again);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(grid.context().stats.snapshot().tiles_created, 1);
        assert_eq!(first.stage(), GenerationStage::Generating);
        assert_eq!(scheduler.queued_task_count(), 1);
    }

    #[test]
    fn out_of_bounds_coordinates_are_rejected() {
        let (grid, _scheduler) = manual_grid(GridConfig {
            vertical_bounds: Some([0, 0]),
            ..GridConfig::default()
        });

        assert_eq!(
            grid.get_or_create_tile(Point3::new(0, 1, 0)).unwrap_err(),
            GridError::OutOfBounds(Point3::new(0, 1, 0))
        );
        assert_eq!(grid.tile_count(), 0);
    }

    #[test]
    fn lookups_never_create_tiles() {
        let (grid, _scheduler) = manual_grid(GridConfig::default());

        assert!(grid.get_tile_if_exists(Point3::new(0, 0, 0)).is_none());
        assert_eq!(grid.block_at(Point3::new(3, 3, 3)), BlockType::Air);
        assert_eq!(grid.tile_count(), 0);
    }

    #[test]
    fn removal_disposes_and_cancels() {
        let (grid, scheduler) = manual_grid(GridConfig::default());
        let (_, tile) = grid.get_or_create_tile(Point3::new(0, 0, 0)).unwrap();

        assert_eq!(grid.remove_tiles([Point3::new(0, 0, 0), Point3::new(5, 5, 5)]), 1);
        assert!(tile.is_evicted());
        assert!(grid.get_tile_if_exists(Point3::new(0, 0, 0)).is_none());

        // The queued terrain pass is skipped.
        while scheduler.run_one() {}
        assert!(!tile.has_reached(crate::engine_state::voxels::tile::state::Phase::Terrain));
        assert_eq!(grid.context().stats.snapshot().tiles_evicted, 1);
    }

    #[test]
    fn retain_keeps_matching_tiles() {
        let (grid, _scheduler) = manual_grid(GridConfig::default());
        for x in 0..4 {
            grid.get_or_create_tile(Point3::new(x, 0, 0)).unwrap();
        }

        assert_eq!(grid.retain_tiles(|coord| coord.x < 2), 2);
        assert_eq!(grid.tile_count(), 2);
    }
}

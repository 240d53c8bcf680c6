//! # Tile Module
//!
//! A `Tile` is a fixed-size box of voxels and the unit of generation, storage
//! and meshing. Each tile drives itself through its generation phases on the
//! shared [`PriorityScheduler`](crate::engine_state::task_management::PriorityScheduler).
//!
//! ## Generation Flow
//!
//! 1. The grid creates the tile and calls [`Tile::initialize`], which queues the
//!    terrain pass as a positioned task anchored at the tile's centroid
//! 2. The terrain pass fills the payload. An all-air tile is marked sparse and
//!    jumps straight to `Ready`
//! 3. Otherwise the tile completes `Phase::Terrain`, then registers the tiles
//!    directly above and below (when its top or bottom layer has solid cells)
//!    on a [`DependencyBarrier`]
//! 4. Each neighbor resolves its slot when it completes its own terrain phase;
//!    whoever releases the barrier's last count queues the surface pass
//! 5. The surface pass decorates the tile and completes `Phase::Surface`
//!
//! ## Consumer Callbacks
//!
//! [`Tile::invoke_after`] registers work that must run once a phase is done.
//! It only ever runs on the dispatcher's main thread: inline if that thread
//! asks after the phase is complete, otherwise during the next
//! `MainThreadDispatcher::run_pending`.
//!
//! ## Neighbor Relations
//!
//! Tiles never hold references to each other. Dependents are stored as
//! coordinates and looked up in the grid each time they are notified, so an
//! evicted tile is never touched through a stale reference.

use std::{
    fmt,
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Weak,
    },
};

use cgmath::{Point3, Vector3};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use web_time::Instant;

use blocks::TileBlocks;
use dependency::{DependencyBarrier, SlotId};
use state::{GenerationStage, Phase, StageCell, PHASE_COUNT};

use super::block::block_type::BlockType;
use super::grid::{GenerationContext, Grid};
use super::tasks::surface_pass::SurfacePass;
use crate::core::{CancellationToken, MainThreadCallback, MtResource};
use crate::engine_state::config::DirtyPropagation;
use crate::engine_state::rendering::MeshBuilder;

pub mod blocks;
pub mod dependency;
pub mod state;

/// Integer coordinate of a tile in the tile grid.
pub type TileCoord = Point3<i32>;

/// Offsets to the six face-adjacent tiles.
pub const FACE_OFFSETS: [Vector3<i32>; 6] = [
    Vector3 { x: 1, y: 0, z: 0 },
    Vector3 { x: -1, y: 0, z: 0 },
    Vector3 { x: 0, y: 1, z: 0 },
    Vector3 { x: 0, y: -1, z: 0 },
    Vector3 { x: 0, y: 0, z: 1 },
    Vector3 { x: 0, y: 0, z: -1 },
];

/// Splits a world block position into its tile coordinate and the position
/// local to that tile.
pub fn split_world_position(world: Point3<i32>, extent: Vector3<i32>) -> (TileCoord, Point3<i32>) {
    (
        Point3::new(
            world.x.div_euclid(extent.x),
            world.y.div_euclid(extent.y),
            world.z.div_euclid(extent.z),
        ),
        Point3::new(
            world.x.rem_euclid(extent.x),
            world.y.rem_euclid(extent.y),
            world.z.rem_euclid(extent.z),
        ),
    )
}

/// When each generation milestone of a tile happened.
#[derive(Debug, Clone, Copy)]
pub struct TileTimeline {
    pub created: Instant,
    pub terrain_started: Option<Instant>,
    pub terrain_completed: Option<Instant>,
    pub surface_started: Option<Instant>,
    pub surface_completed: Option<Instant>,
}

struct Dependent {
    waiter: TileCoord,
    slot: SlotId,
}

#[derive(Default)]
struct TileListeners {
    pending: [Vec<MainThreadCallback>; PHASE_COUNT],
    dependents: Vec<Dependent>,
}

pub struct Tile {
    coord: TileCoord,
    stage: StageCell,
    /// Number of completed phases. Only ever incremented by one.
    completed_phases: AtomicU8,
    sparse: AtomicBool,
    blocks: MtResource<Option<TileBlocks>>,
    listeners: Mutex<TileListeners>,
    barrier: DependencyBarrier,
    cancellation: CancellationToken,
    mesh_requested: AtomicBool,
    rebuilding: AtomicBool,
    dirty: AtomicBool,
    timeline: Mutex<TileTimeline>,
    context: Arc<GenerationContext>,
    grid: Weak<Grid>,
}

impl Tile {
    pub(crate) fn new(coord: TileCoord, context: Arc<GenerationContext>, grid: Weak<Grid>) -> Self {
        context.stats.record_tile_created();
        Self {
            coord,
            stage: StageCell::new(),
            completed_phases: AtomicU8::new(0),
            sparse: AtomicBool::new(false),
            blocks: MtResource::new(None),
            listeners: Mutex::new(TileListeners::default()),
            barrier: DependencyBarrier::new(),
            cancellation: CancellationToken::new(),
            mesh_requested: AtomicBool::new(false),
            rebuilding: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            timeline: Mutex::new(TileTimeline {
                created: Instant::now(),
                terrain_started: None,
                terrain_completed: None,
                surface_started: None,
                surface_completed: None,
            }),
            context,
            grid,
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn stage(&self) -> GenerationStage {
        self.stage.get()
    }

    pub fn is_ready(&self) -> bool {
        self.stage() == GenerationStage::Ready
    }

    pub fn is_evicted(&self) -> bool {
        self.stage() == GenerationStage::Evicted
    }

    /// Whether the tile turned out to be all air. Sparse tiles have no payload.
    pub fn is_sparse(&self) -> bool {
        self.sparse.load(Ordering::Acquire)
    }

    pub fn completed_phases(&self) -> usize {
        self.completed_phases.load(Ordering::Acquire) as usize
    }

    /// Returns `true` once `phase` has completed.
    pub fn has_reached(&self, phase: Phase) -> bool {
        self.completed_phases() > phase.index()
    }

    pub fn timeline(&self) -> TileTimeline {
        *self.timeline.lock()
    }

    /// Neighbors this tile is still waiting for.
    pub fn pending_dependencies(&self) -> Vec<TileCoord> {
        self.barrier.pending()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// World position of the tile's minimum corner.
    pub fn world_origin(&self) -> Point3<i32> {
        let extent = self.context.grid_config.tile_extent();
        Point3::new(
            self.coord.x * extent.x,
            self.coord.y * extent.y,
            self.coord.z * extent.z,
        )
    }

    /// World-space center of the tile, the anchor of its generation tasks.
    pub fn centroid(&self) -> Point3<f32> {
        let origin = self.world_origin();
        let extent = self.context.grid_config.tile_extent();
        Point3::new(
            origin.x as f32 + extent.x as f32 / 2.0,
            origin.y as f32 + extent.y as f32 / 2.0,
            origin.z as f32 + extent.z as f32 / 2.0,
        )
    }

    /// Block at a tile-local position. Sparse tiles and out-of-range positions
    /// read as air.
    pub fn block_at_local(&self, local: Point3<i32>) -> BlockType {
        self.blocks
            .get()
            .as_ref()
            .map_or(BlockType::Air, |blocks| blocks.get(local))
    }

    /// Runs `f` with a read lock on the payload (`None` for sparse or not yet
    /// generated tiles).
    pub fn with_blocks<R>(&self, f: impl FnOnce(Option<&TileBlocks>) -> R) -> R {
        f(self.blocks.get().as_ref())
    }

    pub(crate) fn blocks(&self) -> &MtResource<Option<TileBlocks>> {
        &self.blocks
    }

    pub(crate) fn context(&self) -> &Arc<GenerationContext> {
        &self.context
    }

    pub(crate) fn grid(&self) -> Option<Arc<Grid>> {
        self.grid.upgrade()
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn barrier(&self) -> &DependencyBarrier {
        &self.barrier
    }

    pub(crate) fn set_sparse(&self, sparse: bool) {
        self.sparse.store(sparse, Ordering::Release);
    }

    pub(crate) fn transition(&self, from: GenerationStage, to: GenerationStage) -> bool {
        match self.stage.transition(from, to) {
            Ok(()) => {
                trace!("Tile {:?}: {:?} -> {:?}", self.coord, from, to);
                true
            }
            Err(GenerationStage::Evicted) => false,
            Err(actual) => {
                warn!(
                    "Tile {:?}: rejected transition {:?} -> {:?} (currently {:?})",
                    self.coord, from, to, actual
                );
                false
            }
        }
    }

    pub(crate) fn record(&self, f: impl FnOnce(&mut TileTimeline)) {
        f(&mut self.timeline.lock());
    }

    /// Queues the terrain pass. Only the first call has any effect.
    ///
    /// # Returns
    /// `true` if this call started generation.
    pub fn initialize(self: &Arc<Self>) -> bool {
        if !self.transition(GenerationStage::Unstarted, GenerationStage::Generating) {
            return false;
        }
        super::tasks::terrain_pass::TerrainPass::schedule(self);
        true
    }

    /// Runs `action` on the main thread once `phase` has completed.
    ///
    /// If the phase is already complete and the caller is the main thread, the
    /// action runs immediately. Otherwise it is queued and runs during the main
    /// thread's next dispatcher drain. Actions registered on an evicted tile are
    /// dropped.
    ///
    /// # Returns
    /// `false` if the tile is evicted and the action was dropped.
    pub fn invoke_after<F>(&self, phase: Phase, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let action: MainThreadCallback = Box::new(action);
        let mut listeners = self.listeners.lock();
        if self.is_evicted() {
            return false;
        }
        if self.has_reached(phase) {
            drop(listeners);
            self.context.dispatcher.run_or_post(action);
        } else {
            listeners.pending[phase.index()].push(action);
        }
        true
    }

    /// Marks `phase` complete, hands its queued callbacks to the main thread and,
    /// for the terrain phase, notifies waiting neighbors.
    ///
    /// # Returns
    /// `false` if `phase` is not the next phase to complete.
    pub(crate) fn complete_phase(&self, phase: Phase) -> bool {
        let next = phase.index() as u8;
        let (callbacks, dependents) = {
            let mut listeners = self.listeners.lock();
            if self
                .completed_phases
                .compare_exchange(next, next + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                warn!(
                    "Tile {:?}: phase {:?} completed out of order ({} phases done)",
                    self.coord,
                    phase,
                    self.completed_phases()
                );
                return false;
            }
            let callbacks = mem::take(&mut listeners.pending[phase.index()]);
            let dependents = match phase {
                Phase::Terrain => mem::take(&mut listeners.dependents),
                Phase::Surface => Vec::new(),
            };
            (callbacks, dependents)
        };

        let now = Instant::now();
        self.record(|timeline| match phase {
            Phase::Terrain => timeline.terrain_completed = Some(now),
            Phase::Surface => timeline.surface_completed = Some(now),
        });
        trace!("Tile {:?}: completed phase {:?}", self.coord, phase);

        for callback in callbacks {
            self.context.dispatcher.post(callback);
        }
        self.release_dependents(dependents);
        true
    }

    /// Asks to be told when this tile's terrain phase completes.
    ///
    /// # Returns
    /// `false` if there is nothing to wait for (terrain already done, or the
    /// tile is evicted); the caller resolves its slot itself.
    pub(crate) fn add_dependent(&self, waiter: TileCoord, slot: SlotId) -> bool {
        let mut listeners = self.listeners.lock();
        if self.has_reached(Phase::Terrain) || self.is_evicted() {
            return false;
        }
        listeners.dependents.push(Dependent { waiter, slot });
        true
    }

    /// Resolves one of this tile's dependency slots, starting the surface pass
    /// when it was the last.
    pub(crate) fn resolve_dependency(self: &Arc<Self>, slot: SlotId) {
        if self.barrier.resolve(slot) {
            SurfacePass::schedule(self);
        }
    }

    fn release_dependents(&self, dependents: Vec<Dependent>) {
        if dependents.is_empty() {
            return;
        }
        let Some(grid) = self.grid() else {
            return;
        };
        for dependent in dependents {
            match grid.get_tile_if_exists(dependent.waiter) {
                Some(waiter) => waiter.resolve_dependency(dependent.slot),
                None => trace!(
                    "Tile {:?}: dependent {:?} no longer exists",
                    self.coord,
                    dependent.waiter
                ),
            }
        }
    }

    /// Queues the tile's first mesh build. Later calls do nothing; stale
    /// meshes go through [`rebuild`](Self::rebuild).
    pub fn request_mesh(self: &Arc<Self>, mesher: Arc<dyn MeshBuilder>) -> bool {
        if self.mesh_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.rebuild(mesher)
    }

    /// Queues a mesh build for after the surface phase.
    ///
    /// # Returns
    /// `false` if a rebuild is already in flight.
    pub fn rebuild(self: &Arc<Self>, mesher: Arc<dyn MeshBuilder>) -> bool {
        if self.rebuilding.swap(true, Ordering::AcqRel) {
            return false;
        }

        let tile = Arc::downgrade(self);
        let queued = self.invoke_after(Phase::Surface, move || {
            let Some(tile) = tile.upgrade() else {
                return;
            };
            tile.dirty.store(false, Ordering::Release);
            tile.build_mesh(mesher.as_ref());
            tile.rebuilding.store(false, Ordering::Release);
        });
        if !queued {
            self.rebuilding.store(false, Ordering::Release);
        }
        queued
    }

    fn build_mesh(&self, mesher: &dyn MeshBuilder) {
        let extent = self.context.grid_config.tile_extent();
        let grid = self.grid();
        let blocks = self.blocks.get();

        let solid_at = |world: Point3<i32>| {
            let (coord, local) = split_world_position(world, extent);
            if coord == self.coord {
                return blocks.as_ref().is_some_and(|blocks| blocks.is_solid(local));
            }
            grid.as_ref()
                .and_then(|grid| grid.get_tile_if_exists(coord))
                .is_some_and(|tile| {
                    tile.with_blocks(|blocks| blocks.is_some_and(|blocks| blocks.is_solid(local)))
                })
        };

        mesher.build_mesh(self.coord, self.world_origin(), blocks.as_ref(), &solid_at);
    }

    /// Flags the tile's mesh as stale. The engine tick rebuilds dirty tiles.
    ///
    /// # Returns
    /// `false` if the tile was already dirty.
    pub fn mark_dirty(&self) -> bool {
        if self.dirty.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.context.push_dirty(self.coord);
        true
    }

    /// Marks ready face-neighbors dirty, if the grid is configured to.
    pub(crate) fn notify_neighbors(&self) {
        if self.context.grid_config.dirty_propagation != DirtyPropagation::Neighbors {
            return;
        }
        let Some(grid) = self.grid() else {
            return;
        };
        for offset in FACE_OFFSETS {
            if let Some(neighbor) = grid.get_tile_if_exists(self.coord + offset) {
                if neighbor.is_ready() {
                    neighbor.mark_dirty();
                }
            }
        }
    }

    /// Cancels in-flight generation, drops queued callbacks and releases any
    /// tile waiting on this one. Called by the grid after removal.
    pub(crate) fn dispose(&self) {
        self.cancellation.cancel();
        let Some(previous) = self.stage.evict() else {
            return;
        };

        let (callbacks, dependents) = {
            let mut listeners = self.listeners.lock();
            let callbacks: usize = listeners.pending.iter().map(Vec::len).sum();
            listeners.pending = Default::default();
            (callbacks, mem::take(&mut listeners.dependents))
        };

        self.context.stats.record_tile_evicted();
        debug!(
            "Evicted tile {:?} while {:?}, dropped {} callbacks, releasing {} dependents",
            self.coord,
            previous,
            callbacks,
            dependents.len()
        );
        self.release_dependents(dependents);
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("coord", &self.coord)
            .field("stage", &self.stage())
            .field("completed_phases", &self.completed_phases())
            .field("sparse", &self.is_sparse())
            .finish_non_exhaustive()
    }
}

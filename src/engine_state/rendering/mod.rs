//! # Rendering Interface
//!
//! Generation never builds geometry itself. Once a tile reaches its surface
//! phase, `Tile::rebuild` hands it to a [`MeshBuilder`] on the main thread.
//!
//! [`FaceCountMesher`] is the headless implementation: it records, per tile,
//! how many block faces a renderer would have to draw.

use std::collections::HashMap;
use std::sync::Arc;

use cgmath::{EuclideanSpace, Point3};
use log::trace;
use parking_lot::Mutex;

use super::voxels::{
    block::{BlockRegistry, RenderQueue},
    tile::{blocks::TileBlocks, TileCoord, FACE_OFFSETS},
};

/// Builds render geometry for a generated tile. Always called on the main
/// thread.
pub trait MeshBuilder: Send + Sync {
    /// # Arguments
    /// * `coord` - The tile being meshed
    /// * `origin` - World position of the tile's minimum corner
    /// * `blocks` - The tile payload, `None` for sparse tiles
    /// * `solid_at` - Solidity of any world position; missing tiles are not solid
    fn build_mesh(
        &self,
        coord: TileCoord,
        origin: Point3<i32>,
        blocks: Option<&TileBlocks>,
        solid_at: &dyn Fn(Point3<i32>) -> bool,
    );
}

/// Visible face counts of one tile's mesh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MeshSummary {
    pub opaque_faces: usize,
    pub transparent_faces: usize,
    /// How many times the tile has been meshed.
    pub builds: usize,
}

/// Counts the faces a renderer would emit, without producing geometry.
pub struct FaceCountMesher {
    registry: Arc<dyn BlockRegistry>,
    meshes: Mutex<HashMap<TileCoord, MeshSummary>>,
}

impl FaceCountMesher {
    pub fn new(registry: Arc<dyn BlockRegistry>) -> Self {
        Self {
            registry,
            meshes: Mutex::new(HashMap::new()),
        }
    }

    pub fn summary(&self, coord: TileCoord) -> Option<MeshSummary> {
        self.meshes.lock().get(&coord).copied()
    }

    pub fn meshed_tile_count(&self) -> usize {
        self.meshes.lock().len()
    }

    /// Sum of every tile's latest face counts.
    pub fn total(&self) -> MeshSummary {
        self.meshes
            .lock()
            .values()
            .fold(MeshSummary::default(), |total, mesh| MeshSummary {
                opaque_faces: total.opaque_faces + mesh.opaque_faces,
                transparent_faces: total.transparent_faces + mesh.transparent_faces,
                builds: total.builds + mesh.builds,
            })
    }
}

impl MeshBuilder for FaceCountMesher {
    fn build_mesh(
        &self,
        coord: TileCoord,
        origin: Point3<i32>,
        blocks: Option<&TileBlocks>,
        solid_at: &dyn Fn(Point3<i32>) -> bool,
    ) {
        let mut opaque_faces = 0;
        let mut transparent_faces = 0;

        if let Some(blocks) = blocks {
            for local in blocks.positions() {
                let queue = self.registry.render_queue(blocks.get(local));
                if queue == RenderQueue::None {
                    continue;
                }
                let visible = FACE_OFFSETS
                    .iter()
                    .filter(|offset| {
                        let neighbor = local + **offset;
                        if blocks.contains(neighbor) {
                            !blocks.is_solid(neighbor)
                        } else {
                            !solid_at(origin + neighbor.to_vec())
                        }
                    })
                    .count();
                match queue {
                    RenderQueue::Opaque => opaque_faces += visible,
                    RenderQueue::Transparent => transparent_faces += visible,
                    RenderQueue::None => {}
                }
            }
        }

        trace!(
            "Meshed tile {:?}: {} opaque, {} transparent faces",
            coord,
            opaque_faces,
            transparent_faces
        );
        let mut meshes = self.meshes.lock();
        let entry = meshes.entry(coord).or_default();
        entry.opaque_faces = opaque_faces;
        entry.transparent_faces = transparent_faces;
        entry.builds += 1;
    }
}

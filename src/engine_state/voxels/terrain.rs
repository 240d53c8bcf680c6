//! # Terrain Module
//!
//! The terrain collaborator decides what each voxel is made of. Generation
//! passes only see it through the [`DensityField`] trait; the noise algorithm
//! behind it is a black box.
//!
//! ## Components
//! - `DensityField`: Pure function from world position to a density scalar
//! - `NoiseTerrain`: Default field built from Perlin noise
//! - `FnDensity`: Adapter turning a closure into a field (handy in tests)
//! - `TerrainShaper`: Maps density plus the configured fluid levels to a `BlockType`

use std::sync::Arc;

use cgmath::Point3;
use noise::{NoiseFn, Perlin};

use super::block::block_type::BlockType;
use crate::engine_state::config::TerrainConfig;

/// Noise above this threshold carves a cave out of otherwise solid ground.
const CAVE_THRESHOLD: f64 = 0.55;
/// Caves are sampled at this multiple of the horizontal scale.
const CAVE_FREQUENCY: f64 = 2.5;

/// A pure scalar field over world space. Positive density is solid.
///
/// Implementations must be deterministic and callable from any worker thread.
pub trait DensityField: Send + Sync {
    fn density(&self, x: f64, y: f64, z: f64) -> f64;

    /// Height of the highest solid point of a column, if the field knows it.
    ///
    /// When `Some(h)` is returned, `density` must be non-positive for every
    /// `y > h` in that column; the shaper then skips sampling above it.
    fn surface_height(&self, _x: f64, _z: f64) -> Option<f64> {
        None
    }
}

/// Rolling hills from 2D Perlin noise, with caves carved by 3D Perlin noise.
pub struct NoiseTerrain {
    perlin: Perlin,
    horizontal_scale: f64,
    vertical_scale: f64,
    base_height: f64,
}

impl NoiseTerrain {
    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            perlin: Perlin::new(config.seed),
            horizontal_scale: config.horizontal_scale,
            vertical_scale: config.vertical_scale,
            base_height: config.base_height,
        }
    }

    fn height(&self, x: f64, z: f64) -> f64 {
        let sample = self
            .perlin
            .get([x * self.horizontal_scale, z * self.horizontal_scale]);
        self.base_height + sample * self.vertical_scale
    }
}

impl DensityField for NoiseTerrain {
    fn density(&self, x: f64, y: f64, z: f64) -> f64 {
        let height_term = self.height(x, z) - y;
        if height_term <= 0.0 {
            return height_term;
        }

        let scale = self.horizontal_scale * CAVE_FREQUENCY;
        let cave = self.perlin.get([x * scale, y * scale, z * scale]);
        if cave > CAVE_THRESHOLD {
            -1.0
        } else {
            height_term
        }
    }

    fn surface_height(&self, x: f64, z: f64) -> Option<f64> {
        Some(self.height(x, z))
    }
}

/// Wraps a closure as a [`DensityField`].
pub struct FnDensity<F> {
    density: F,
}

impl<F> FnDensity<F>
where
    F: Fn(f64, f64, f64) -> f64 + Send + Sync,
{
    pub fn new(density: F) -> Self {
        Self { density }
    }
}

impl<F> DensityField for FnDensity<F>
where
    F: Fn(f64, f64, f64) -> f64 + Send + Sync,
{
    fn density(&self, x: f64, y: f64, z: f64) -> f64 {
        (self.density)(x, y, z)
    }
}

/// Turns density into raw terrain material.
///
/// Solid cells become stone. Empty cells fill with lava at or below
/// `lava_level`, with water at or below `sea_level`, and stay air otherwise.
/// Surface materials are applied later by the decoration pass.
#[derive(Clone)]
pub struct TerrainShaper {
    field: Arc<dyn DensityField>,
    config: TerrainConfig,
}

impl TerrainShaper {
    pub fn new(field: Arc<dyn DensityField>, config: TerrainConfig) -> Self {
        Self { field, config }
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Returns the surface height of a column, rounded down to a block.
    pub fn column_height(&self, x: i32, z: i32) -> Option<i32> {
        self.field
            .surface_height(x as f64, z as f64)
            .map(|height| height.floor() as i32)
    }

    /// Raw material of the block at `world`.
    ///
    /// # Arguments
    /// * `world` - Block position in world coordinates
    /// * `column_height` - Result of [`column_height`](Self::column_height) for
    ///   this column, so callers filling a tile sample it once per column
    pub fn block_at(&self, world: Point3<i32>, column_height: Option<i32>) -> BlockType {
        let above_surface = column_height.is_some_and(|height| world.y > height);
        let solid = !above_surface
            && self
                .field
                .density(world.x as f64, world.y as f64, world.z as f64)
                > 0.0;

        if solid {
            BlockType::Stone
        } else {
            self.fluid_at(world.y)
        }
    }

    fn fluid_at(&self, y: i32) -> BlockType {
        if y <= self.config.lava_level {
            BlockType::Lava
        } else if y <= self.config.sea_level {
            BlockType::Water
        } else {
            BlockType::Air
        }
    }
}

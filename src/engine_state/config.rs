//! # Engine Configuration
//!
//! Every tunable the scheduler, the grid and the terrain collaborator read lives
//! here. The whole tree deserializes from JSON; every field has a default, so a
//! config file only has to name what it changes.
//!
//! ```json
//! {
//!     "scheduler": { "worker_count": 6, "rescore_interval_ms": 500 },
//!     "grid": { "tile_height": 32, "vertical_bounds": [-4, 8] },
//!     "load_radius": 4
//! }
//! ```

use std::{fs, path::Path, thread, time::Duration};

use cgmath::Vector3;
use log::info;
use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use super::voxels::tile::TileCoord;

/// Picks a worker count that leaves one core for the main thread.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

/// Settings for the priority scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads. `None` picks [`default_worker_count`].
    /// `Some(0)` creates no workers; queued work then only runs through
    /// `PriorityScheduler::run_one`.
    pub worker_count: Option<usize>,
    /// How far (in world units) the observer must move before queued
    /// positioned tasks are re-scored.
    pub rescore_distance: f32,
    /// Minimum time between two re-scores, in milliseconds.
    pub rescore_interval_ms: u64,
    /// Per-axis multipliers applied to the observer-to-anchor offset when
    /// computing a positioned task's score.
    pub axis_weights: [f32; 3],
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            rescore_distance: 8.0,
            rescore_interval_ms: 250,
            axis_weights: [1.0, 1.0, 1.0],
        }
    }
}

impl SchedulerConfig {
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(default_worker_count)
    }

    pub fn rescore_interval(&self) -> Duration {
        Duration::from_millis(self.rescore_interval_ms)
    }

    pub fn axis_weights(&self) -> Vector3<f32> {
        Vector3::from(self.axis_weights)
    }
}

/// Whether a tile that finishes generating marks its face neighbors for a mesh
/// rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyPropagation {
    /// Neighbors are left alone.
    #[default]
    Disabled,
    /// Ready face-neighbors are marked dirty and rebuilt on the next engine tick.
    Neighbors,
}

/// Settings for the tile grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Tile extent along X and Z, in blocks.
    pub tile_width: u32,
    /// Tile extent along Y, in blocks.
    pub tile_height: u32,
    /// Inclusive range of tile Y coordinates the grid may contain. `None`
    /// leaves the grid unbounded, which only terminates for terrain that turns
    /// to air (or sparse) in both vertical directions.
    pub vertical_bounds: Option<[i32; 2]>,
    pub dirty_propagation: DirtyPropagation,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            tile_width: 16,
            tile_height: 16,
            vertical_bounds: Some([-4, 4]),
            dirty_propagation: DirtyPropagation::Disabled,
        }
    }
}

impl GridConfig {
    /// Returns `true` if `coord` lies within the configured vertical bounds.
    pub fn contains(&self, coord: TileCoord) -> bool {
        match self.vertical_bounds {
            Some([min, max]) => (min..=max).contains(&coord.y),
            None => true,
        }
    }

    pub fn tile_extent(&self) -> Vector3<i32> {
        Vector3::new(
            self.tile_width as i32,
            self.tile_height as i32,
            self.tile_width as i32,
        )
    }
}

/// Settings for the built-in terrain shaper and noise field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    pub seed: u32,
    /// Scale applied to world X/Z before sampling noise.
    pub horizontal_scale: f64,
    /// Amplitude of the surface height, in blocks.
    pub vertical_scale: f64,
    /// World Y the surface oscillates around.
    pub base_height: f64,
    /// Non-solid cells at or below this height fill with water.
    pub sea_level: i32,
    /// Non-solid cells at or below this height fill with lava.
    pub lava_level: i32,
    /// Number of decorated cells under an exposed surface, the surface included.
    pub surface_layers: u32,
    /// Surfaces within this many blocks of sea level become sand.
    pub beach_height: i32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            horizontal_scale: 0.02,
            vertical_scale: 24.0,
            base_height: 8.0,
            sea_level: 0,
            lava_level: -48,
            surface_layers: 3,
            beach_height: 2,
        }
    }
}

/// Top-level configuration for [`EngineState`](super::EngineState).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub grid: GridConfig,
    pub terrain: TerrainConfig,
    /// Tiles within this many tiles of the observer (per axis) are requested.
    pub load_radius: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            grid: GridConfig::default(),
            terrain: TerrainConfig::default(),
            load_radius: 2,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.tile_width == 0 || self.grid.tile_height == 0 {
            return Err(ConfigError::Invalid(
                "tile dimensions must be non-zero".to_string(),
            ));
        }
        if let Some([min, max]) = self.grid.vertical_bounds {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "vertical bounds are reversed: [{min}, {max}]"
                )));
            }
        }
        if !(self.scheduler.rescore_distance >= 0.0) {
            return Err(ConfigError::Invalid(
                "rescore_distance must be a non-negative number".to_string(),
            ));
        }
        if self.scheduler.axis_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid(
                "axis weights must be finite and non-negative".to_string(),
            ));
        }
        if self.load_radius < 0 {
            return Err(ConfigError::Invalid(
                "load_radius must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

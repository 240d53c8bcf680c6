#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Tile Scheduler
//!
//! A priority task scheduler and the tile generation pipeline built on it.
//!
//! Worker threads pull tasks from per-class queues, closest to the observer
//! first. Tiles of a voxel grid are generated in two phases on those workers;
//! a tile's surface phase waits for the terrain phase of the tiles above and
//! below it, and finished phases are published back to the main thread.
//!
//! ## Key Modules
//!
//! * `core` - Concurrency primitives: locked resources, cancellation, main-thread dispatch
//! * `engine_state` - The scheduler, the tile grid and the engine that drives them
//!
//! ## Usage
//!
//! ```no_run
//! fn main() {
//!     if let Err(err) = tile_scheduler::run() {
//!         eprintln!("{err}");
//!     }
//! }
//! ```
//!
//! The demo accepts an optional path to a JSON config file as its first
//! argument. Log output is controlled by `RUST_LOG`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cgmath::Point3;
use log::info;
use web_time::Instant;

use engine_state::{
    config::EngineConfig,
    errors::EngineError,
    rendering::FaceCountMesher,
    voxels::{block::DefaultBlockRegistry, terrain::NoiseTerrain},
    EngineState,
};

pub mod core;
pub mod engine_state;

const DEMO_TICKS: u32 = 600;
const TICK: Duration = Duration::from_millis(16);
const REPORT_EVERY: u32 = 60;
/// Tiles past this many load radii from the observer are unloaded.
const UNLOAD_MARGIN: i32 = 2;

/// Runs the headless demo: an observer wanders across generated terrain while
/// the main thread ticks the engine.
pub fn run() -> Result<(), EngineError> {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let registry = Arc::new(DefaultBlockRegistry);
    let field = Arc::new(NoiseTerrain::new(&config.terrain));
    let mesher = Arc::new(FaceCountMesher::new(registry.clone()));
    let unload_radius = config.load_radius + UNLOAD_MARGIN;

    let mut engine = EngineState::new(config, field, registry, mesher.clone())?;
    info!(
        "Scheduler running {} workers",
        engine.scheduler().worker_count()
    );

    let started = Instant::now();
    let mut observer = Point3::new(0.0f32, 8.0, 0.0);
    let mut callbacks_run = 0;

    for tick in 1..=DEMO_TICKS {
        observer.x += 0.5 + fastrand::f32() * 0.25;
        observer.z += (fastrand::f32() - 0.5) * 0.5;
        engine.set_observer_position(observer);

        // The engine was created on this thread, so dispatch cannot fail here.
        if let Ok(summary) = engine.update() {
            callbacks_run += summary.callbacks_run;
        }

        if tick % REPORT_EVERY == 0 {
            let unloaded = engine.unload_beyond(unload_radius);
            let stats = engine.stats();
            info!(
                "t={:.1}s observer at {:?}: {} tiles ({} ready, {} sparse), {} queued, {} unloaded",
                started.elapsed().as_secs_f32(),
                engine.observer_tile(),
                engine.grid().tile_count(),
                stats.tiles_ready,
                stats.sparse_tiles,
                engine.queued_task_count(),
                unloaded
            );
        }

        thread::sleep(TICK);
    }

    let totals = mesher.total();
    info!(
        "Done after {:.1}s: {} callbacks, {} tiles meshed, {} opaque and {} transparent faces",
        started.elapsed().as_secs_f32(),
        callbacks_run,
        mesher.meshed_tile_count(),
        totals.opaque_faces,
        totals.transparent_faces
    );

    engine.scheduler().shutdown();
    Ok(())
}

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Barrier,
};
use std::thread;
use std::time::Duration;

use cgmath::Point3;
use parking_lot::Mutex;
use web_time::Instant;

use tile_scheduler::core::MainThreadDispatcher;
use tile_scheduler::engine_state::{
    config::{DirtyPropagation, EngineConfig, GridConfig, SchedulerConfig, TerrainConfig},
    rendering::FaceCountMesher,
    task_management::PriorityScheduler,
    voxels::{
        block::{block_type::BlockType, DefaultBlockRegistry},
        grid::{GenerationContext, Grid},
        terrain::{DensityField, FnDensity, TerrainShaper},
        tile::{state::Phase, Tile},
    },
    EngineState,
};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Flat ground: everything below world y = `ground` is stone.
fn flat_terrain(ground: f64) -> (Arc<dyn DensityField>, TerrainConfig) {
    let terrain = TerrainConfig {
        sea_level: -1000,
        lava_level: -2000,
        ..TerrainConfig::default()
    };
    (Arc::new(FnDensity::new(move |_, y, _| ground - y)), terrain)
}

fn grid_with_workers(workers: usize, ground: f64) -> (Arc<Grid>, Arc<MainThreadDispatcher>) {
    let scheduler = Arc::new(
        PriorityScheduler::new(SchedulerConfig {
            worker_count: Some(workers),
            ..SchedulerConfig::default()
        })
        .unwrap(),
    );
    let dispatcher = Arc::new(MainThreadDispatcher::new());
    let (field, terrain) = flat_terrain(ground);
    let context = GenerationContext::new(
        scheduler,
        dispatcher.clone(),
        TerrainShaper::new(field, terrain),
        Arc::new(DefaultBlockRegistry),
        GridConfig {
            tile_width: 8,
            tile_height: 8,
            ..GridConfig::default()
        },
    );
    (Grid::new(Arc::new(context)), dispatcher)
}

/// Pumps the dispatcher on this thread until `done` holds or the timeout hits.
fn pump_until(dispatcher: &MainThreadDispatcher, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for generation");
        dispatcher.run_pending().unwrap();
        thread::sleep(Duration::from_millis(2));
    }
}

fn wait_ready(dispatcher: &MainThreadDispatcher, tile: &Arc<Tile>) {
    pump_until(dispatcher, || tile.is_ready() && tile.has_reached(Phase::Surface));
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
    let count = Arc::new(AtomicUsize::new(0));
    let shared = count.clone();
    let increment = move || {
        let count = shared.clone();
        Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        }) as Box<dyn FnOnce() + Send>
    };
    (count, increment)
}

#[test]
fn surface_pass_waits_for_both_vertical_neighbors() {
    let (grid, dispatcher) = grid_with_workers(4, 4.0);

    // Tile -1 is solid top to bottom, so it needs the tiles above and below.
    let (_, middle) = grid.get_or_create_tile(Point3::new(0, -1, 0)).unwrap();
    wait_ready(&dispatcher, &middle);

    let above = grid.get_tile_if_exists(Point3::new(0, 0, 0)).unwrap();
    let below = grid.get_tile_if_exists(Point3::new(0, -2, 0)).unwrap();

    let surface_started = middle.timeline().surface_started.unwrap();
    assert!(surface_started >= above.timeline().terrain_completed.unwrap());
    assert!(surface_started >= below.timeline().terrain_completed.unwrap());
    assert!(middle.pending_dependencies().is_empty());
}

#[test]
fn grass_is_laid_on_the_surface_across_the_tile_seam() {
    let (grid, dispatcher) = grid_with_workers(2, 8.0);

    // Ground ends exactly on the boundary between tile 0 and tile 1.
    let (_, ground) = grid.get_or_create_tile(Point3::new(2, 0, 2)).unwrap();
    wait_ready(&dispatcher, &ground);

    assert_eq!(grid.block_at(Point3::new(17, 7, 17)), BlockType::Grass);
    assert_eq!(grid.block_at(Point3::new(17, 6, 17)), BlockType::Dirt);
    assert_eq!(grid.block_at(Point3::new(17, 8, 17)), BlockType::Air);
    assert_eq!(grid.block_at(Point3::new(17, 0, 17)), BlockType::Stone);
}

#[test]
fn callbacks_registered_on_a_worker_run_on_the_main_thread() {
    let (grid, dispatcher) = grid_with_workers(2, 4.0);
    let main_thread = thread::current().id();
    let ran_on = Arc::new(Mutex::new(None));
    let runs = Arc::new(AtomicUsize::new(0));

    let (_, tile) = grid.get_or_create_tile(Point3::new(3, 0, 0)).unwrap();
    let registering = {
        let tile = tile.clone();
        let ran_on = ran_on.clone();
        let runs = runs.clone();
        thread::spawn(move || {
            tile.invoke_after(Phase::Surface, move || {
                runs.fetch_add(1, Ordering::SeqCst);
                *ran_on.lock() = Some(thread::current().id());
            })
        })
    };
    assert!(registering.join().unwrap());

    pump_until(&dispatcher, || ran_on.lock().is_some());
    assert_eq!(*ran_on.lock(), Some(main_thread));
    assert!(tile.has_reached(Phase::Surface));

    for _ in 0..10 {
        dispatcher.run_pending().unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn callbacks_for_reached_phases_run_inline_on_the_main_thread() {
    let (grid, dispatcher) = grid_with_workers(2, 4.0);
    let (count, increment) = counter();

    let (_, sky) = grid.get_or_create_tile(Point3::new(1, 2, 1)).unwrap();
    pump_until(&dispatcher, || sky.has_reached(Phase::Surface));

    assert!(sky.invoke_after(Phase::Surface, increment()));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.pending_count(), 0);
}

#[test]
fn evicted_tiles_drop_their_callbacks() {
    let (grid, dispatcher) = grid_with_workers(0, 4.0);
    let scheduler = grid.context().scheduler.clone();
    let (count, increment) = counter();
    let coord = Point3::new(4, 0, 4);

    let (_, tile) = grid.get_or_create_tile(coord).unwrap();
    assert!(tile.invoke_after(Phase::Surface, increment()));
    assert_eq!(grid.remove_tiles([coord]), 1);

    assert!(tile.is_evicted());
    assert!(!tile.invoke_after(Phase::Terrain, increment()));

    while scheduler.run_one() {}
    dispatcher.run_pending().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(!tile.has_reached(Phase::Terrain));
}

#[test]
fn rebuilds_are_rejected_while_one_is_in_flight() {
    let (grid, dispatcher) = grid_with_workers(0, 4.0);
    let scheduler = grid.context().scheduler.clone();
    let mesher = Arc::new(FaceCountMesher::new(Arc::new(DefaultBlockRegistry)));
    let coord = Point3::new(0, 0, 0);

    let (_, tile) = grid.get_or_create_tile(coord).unwrap();
    assert!(tile.rebuild(mesher.clone()));
    assert!(!tile.rebuild(mesher.clone()));

    while scheduler.run_one() {}
    pump_until(&dispatcher, || mesher.summary(coord).is_some());
    assert_eq!(mesher.summary(coord).unwrap().builds, 1);

    // Ready tile on the main thread: the build runs inside the call.
    assert!(tile.rebuild(mesher.clone()));
    assert_eq!(mesher.summary(coord).unwrap().builds, 2);
}

#[test]
fn concurrent_lookups_create_a_single_tile() {
    let (grid, _dispatcher) = grid_with_workers(0, 4.0);
    let barrier = Arc::new(Barrier::new(100));

    let tiles: Vec<Arc<Tile>> = (0..100)
        .map(|_| {
            let grid = grid.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                grid.get_or_create_tile(Point3::new(5, 0, -5)).unwrap().1
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert!(tiles.iter().all(|tile| Arc::ptr_eq(tile, &tiles[0])));
    assert_eq!(grid.context().stats.snapshot().tiles_created, 1);
    assert_eq!(grid.context().scheduler.queued_task_count(), 1);
}

#[test]
fn empty_tiles_skip_decoration() {
    let (grid, dispatcher) = grid_with_workers(2, 4.0);

    let (_, sky) = grid.get_or_create_tile(Point3::new(0, 2, 0)).unwrap();
    wait_ready(&dispatcher, &sky);

    let stats = grid.context().stats.snapshot();
    assert!(sky.is_sparse());
    assert_eq!(sky.completed_phases(), 2);
    assert_eq!(stats.decoration_passes, 0);
    assert_eq!(stats.sparse_tiles, 1);
    assert_eq!(grid.tile_count(), 1);
}

#[test]
fn evicting_a_dependency_releases_the_waiting_tile() {
    let (grid, dispatcher) = grid_with_workers(0, 4.0);
    let scheduler = grid.context().scheduler.clone();

    let (_, middle) = grid.get_or_create_tile(Point3::new(0, -1, 0)).unwrap();
    // Terrain pass of the middle tile creates and waits on both neighbors.
    assert!(scheduler.run_one());
    assert_eq!(middle.pending_dependencies().len(), 2);

    let removed = grid.remove_tiles([Point3::new(0, 0, 0), Point3::new(0, -2, 0)]);
    assert_eq!(removed, 2);

    // Both slots resolved by eviction; the surface pass is now queued.
    while scheduler.run_one() {}
    pump_until(&dispatcher, || middle.is_ready());
    assert_eq!(grid.context().stats.snapshot().tiles_evicted, 2);
}

#[test]
fn engine_meshes_every_tile_around_the_observer() {
    let (field, terrain) = flat_terrain(4.0);
    let config = EngineConfig {
        scheduler: SchedulerConfig {
            worker_count: Some(4),
            ..SchedulerConfig::default()
        },
        grid: GridConfig {
            tile_width: 8,
            tile_height: 8,
            ..GridConfig::default()
        },
        terrain,
        load_radius: 1,
    };
    let registry = Arc::new(DefaultBlockRegistry);
    let mesher = Arc::new(FaceCountMesher::new(registry.clone()));
    let mut engine = EngineState::new(config, field, registry, mesher.clone()).unwrap();

    // Workers may create some of these as dependencies before they are requested.
    let created = engine.set_observer_position(Point3::new(4.0, 4.0, 4.0));
    assert!(created > 0 && created <= 27);
    assert!(engine.grid().tile_count() >= 27);
    assert_eq!(engine.set_observer_position(Point3::new(5.0, 5.0, 5.0)), 0);

    let deadline = Instant::now() + TIMEOUT;
    while mesher.meshed_tile_count() < 27 {
        assert!(Instant::now() < deadline, "timed out waiting for meshes");
        engine.update().unwrap();
        thread::sleep(Duration::from_millis(2));
    }

    let ground = mesher.summary(Point3::new(0, 0, 0)).unwrap();
    assert!(ground.opaque_faces > 0);
    assert_eq!(mesher.summary(Point3::new(0, 1, 0)).unwrap().opaque_faces, 0);
}

/// Runs queued tasks and main-thread work until neither produces more.
fn settle(engine: &mut EngineState) {
    loop {
        let mut ran = false;
        while engine.scheduler().run_one() {
            ran = true;
        }
        let summary = engine.update().unwrap();
        if !ran && summary.callbacks_run == 0 && summary.rebuilds_queued == 0 {
            break;
        }
    }
}

#[test]
fn ready_neighbors_mark_meshed_tiles_dirty() {
    let (field, terrain) = flat_terrain(4.0);
    let config = EngineConfig {
        scheduler: SchedulerConfig {
            worker_count: Some(0),
            ..SchedulerConfig::default()
        },
        grid: GridConfig {
            tile_width: 8,
            tile_height: 8,
            dirty_propagation: DirtyPropagation::Neighbors,
            ..GridConfig::default()
        },
        terrain,
        load_radius: 0,
    };
    let registry = Arc::new(DefaultBlockRegistry);
    let mesher = Arc::new(FaceCountMesher::new(registry.clone()));
    let mut engine = EngineState::new(config, field, registry, mesher.clone()).unwrap();
    let origin = Point3::new(0, 0, 0);

    engine.set_observer_position(Point3::new(4.0, 4.0, 4.0));
    settle(&mut engine);
    let before = mesher.summary(origin).unwrap();
    assert!(before.opaque_faces > 0);

    // The tile at x = 1 now covers the +x side of the ground.
    engine.set_observer_position(Point3::new(12.0, 4.0, 4.0));
    settle(&mut engine);
    let after = mesher.summary(origin).unwrap();

    assert!(engine.grid().get_tile_if_exists(Point3::new(1, 0, 0)).unwrap().is_ready());
    assert!(after.builds > before.builds);
    assert!(after.opaque_faces < before.opaque_faces);
}

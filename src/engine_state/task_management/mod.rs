//! # Priority Task Scheduler
//!
//! This module runs deferred work on a fixed pool of worker threads, always
//! handing the most urgent queued task to the next free worker.
//!
//! ## Architecture Overview
//!
//! - `PriorityScheduler`: Owns the worker threads and the queues
//! - `PriorityTask`: A unit of work tagged with a class and a score
//! - `TaskHandle`: Completion handle returned for every submitted task
//! - `SchedulerQueues`: One unordered queue per `PriorityClass`, behind one lock
//!
//! ## Selection
//! Classes are scanned most urgent first. Within the first non-empty class the
//! task with the lowest score wins (ties go to the earliest slot), found by a
//! linear scan and removed by swapping with the last element. Queue depths stay
//! in the hundreds, where a scan beats maintaining a heap under re-scoring.
//!
//! Nothing guarantees FIFO within a class: a distant task can wait indefinitely
//! while closer tasks keep arriving.
//!
//! ## Observer Re-scoring
//! Positioned tasks are scored by their distance to the observer (the player).
//! `set_observer_position` re-scores every queued task, but only once the
//! observer has moved further than `rescore_distance` and at least
//! `rescore_interval` has passed since the previous re-score, since a re-score
//! walks every queued task.
//!
//! ## Failure and Shutdown
//! - A panicking task body is caught on the worker; its handle resolves with
//!   `TaskError::Panicked` and the worker moves on
//! - Cancelled tasks are skipped and resolve with `TaskError::Cancelled`
//! - Dropping the scheduler stops the workers after their current task and
//!   resolves every queued task with `TaskError::Shutdown`
//!
//! ## Example Usage
//! ```rust
//! use cgmath::Point3;
//! use tile_scheduler::engine_state::config::SchedulerConfig;
//! use tile_scheduler::engine_state::task_management::{task::PriorityClass, PriorityScheduler};
//!
//! let scheduler = PriorityScheduler::new(SchedulerConfig::default()).unwrap();
//!
//! let handle = scheduler.schedule(PriorityClass::Normal, 0, || println!("hello"));
//! let near = scheduler.schedule_at(PriorityClass::High, Point3::new(8.0, 8.0, 8.0), || {});
//!
//! handle.wait().unwrap();
//! near.wait().unwrap();
//! ```

pub mod task;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use cgmath::{Point3, Vector3};
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use task::{weighted_distance, Priority, PriorityClass, PriorityTask, TaskHandle, TaskId};
use web_time::Instant;

use super::config::SchedulerConfig;

/// Snapshot of one queued task, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedTaskInfo {
    pub id: TaskId,
    pub class: PriorityClass,
    pub score: Priority,
    pub anchor: Option<Point3<f32>>,
}

/// Where priority is measured from, and when the queues were last re-scored.
struct ObserverState {
    position: Point3<f32>,
    rescored_from: Point3<f32>,
    rescored_at: Option<Instant>,
}

/// The per-class queues. Invariant: every accepted, not yet dequeued task is in
/// exactly one of these vectors.
struct SchedulerQueues {
    classes: [Vec<PriorityTask>; PriorityClass::COUNT],
    len: usize,
    observer: ObserverState,
}

impl SchedulerQueues {
    fn new() -> Self {
        let origin = Point3::new(0.0, 0.0, 0.0);
        Self {
            classes: std::array::from_fn(|_| Vec::new()),
            len: 0,
            observer: ObserverState {
                position: origin,
                rescored_from: origin,
                rescored_at: None,
            },
        }
    }

    fn push(&mut self, task: PriorityTask) {
        self.classes[task.class().index()].push(task);
        self.len += 1;
    }

    /// Removes the globally most urgent task.
    fn take_best(&mut self) -> Option<PriorityTask> {
        for queue in self.classes.iter_mut() {
            let best = queue
                .iter()
                .enumerate()
                .min_by_key(|(_, task)| task.score())
                .map(|(index, _)| index);
            if let Some(index) = best {
                self.len -= 1;
                return Some(queue.swap_remove(index));
            }
        }
        None
    }

    fn rescore(&mut self, observer: Point3<f32>, weights: Vector3<f32>) -> usize {
        let mut count = 0;
        for task in self.classes.iter_mut().flatten() {
            task.rescore(observer, weights);
            count += 1;
        }
        count
    }

    fn drain(&mut self) -> Vec<PriorityTask> {
        self.len = 0;
        self.classes.iter_mut().flat_map(std::mem::take).collect()
    }
}

/// State shared between the scheduler handle, its workers and task handles.
pub(crate) struct Shared {
    queues: Mutex<SchedulerQueues>,
    work_available: Condvar,
    shutdown: AtomicBool,
    config: SchedulerConfig,
    weights: Vector3<f32>,
}

impl Shared {
    /// Scores and queues a task, then wakes one worker.
    pub(crate) fn enqueue(self: &Arc<Self>, mut task: PriorityTask) -> TaskHandle {
        task.state().bind(Arc::downgrade(self));
        let handle = task.handle();

        let mut queues = self.queues.lock();
        if self.shutdown.load(Ordering::Acquire) {
            drop(queues);
            task.abandon();
            return handle;
        }
        task.rescore(queues.observer.position, self.weights);
        queues.push(task);
        drop(queues);

        self.work_available.notify_one();
        handle
    }

    /// Blocks until a task is available or the scheduler shuts down.
    fn next_task(&self) -> Option<PriorityTask> {
        let mut queues = self.queues.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(task) = queues.take_best() {
                return Some(task);
            }
            self.work_available.wait(&mut queues);
        }
    }

    fn execute(self: &Arc<Self>, task: PriorityTask) {
        for continuation in task.run() {
            self.enqueue(continuation);
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while let Some(task) = shared.next_task() {
        shared.execute(task);
    }
}

/// A fixed pool of worker threads pulling from per-class priority queues.
///
/// The scheduler is an explicit object: construct one per world (or per test)
/// and share it behind an `Arc`.
pub struct PriorityScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl PriorityScheduler {
    /// Creates a scheduler and starts its worker threads.
    ///
    /// # Arguments
    /// * `config` - Worker count, re-score thresholds and axis weights
    ///
    /// # Returns
    /// The scheduler, or the I/O error raised when a worker thread could not be
    /// spawned. Workers spawned before the failure are shut down again.
    pub fn new(config: SchedulerConfig) -> std::io::Result<Self> {
        let worker_count = config.resolved_worker_count();
        let shared = Arc::new(Shared {
            queues: Mutex::new(SchedulerQueues::new()),
            work_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            weights: config.axis_weights(),
            config,
        });

        info!(
            "Starting priority scheduler with {} workers (available parallelism: {:?})",
            worker_count,
            thread::available_parallelism()
        );

        let scheduler = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };

        for index in 0..worker_count {
            let shared = scheduler.shared.clone();
            let worker = thread::Builder::new()
                .name(format!("tile-worker-{index}"))
                .spawn(move || worker_loop(shared))?;
            scheduler.workers.lock().push(worker);
        }

        Ok(scheduler)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Enqueues a fixed-score task. Never blocks on the task itself.
    pub fn schedule<F>(&self, class: PriorityClass, priority: Priority, action: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(PriorityTask::new(class, priority, action))
    }

    /// Enqueues a task scored by the distance between `anchor` and the observer.
    pub fn schedule_at<F>(&self, class: PriorityClass, anchor: Point3<f32>, action: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(PriorityTask::positioned(class, anchor, action))
    }

    /// Enqueues a pre-built task.
    pub fn submit(&self, task: PriorityTask) -> TaskHandle {
        self.shared.enqueue(task)
    }

    /// Runs the most urgent queued task on the calling thread.
    ///
    /// # Returns
    /// `false` if nothing was queued.
    pub fn run_one(&self) -> bool {
        let task = self.shared.queues.lock().take_best();
        match task {
            Some(task) => {
                self.shared.execute(task);
                true
            }
            None => false,
        }
    }

    pub fn observer_position(&self) -> Point3<f32> {
        self.shared.queues.lock().observer.position
    }

    /// Moves the observer, re-scoring queued tasks when the move is large enough.
    ///
    /// New positioned tasks are always scored against the latest position. The
    /// queued ones are re-scored only if the observer moved more than
    /// `rescore_distance` since the last re-score and `rescore_interval` has
    /// passed since then.
    ///
    /// # Returns
    /// `true` if the queues were re-scored.
    pub fn set_observer_position(&self, position: Point3<f32>) -> bool {
        let now = Instant::now();
        let config = &self.shared.config;
        let mut queues = self.shared.queues.lock();
        queues.observer.position = position;

        let moved = weighted_distance(
            queues.observer.rescored_from,
            position,
            Vector3::new(1.0, 1.0, 1.0),
        );
        let interval_elapsed = queues
            .observer
            .rescored_at
            .map_or(true, |at| now.duration_since(at) >= config.rescore_interval());
        if moved <= config.rescore_distance || !interval_elapsed {
            return false;
        }

        let count = queues.rescore(position, self.shared.weights);
        queues.observer.rescored_from = position;
        queues.observer.rescored_at = Some(now);
        drop(queues);

        self.shared.work_available.notify_all();
        debug!(
            "Re-scored {} queued tasks for observer at {:?} in {:?}",
            count,
            position,
            now.elapsed()
        );
        true
    }

    /// Number of tasks accepted but not yet picked up by a worker.
    pub fn queued_task_count(&self) -> usize {
        self.shared.queues.lock().len
    }

    pub fn queued_task_counts_by_class(&self) -> [usize; PriorityClass::COUNT] {
        let queues = self.shared.queues.lock();
        std::array::from_fn(|index| queues.classes[index].len())
    }

    /// Snapshot of every queued task with its current score.
    pub fn queued_scores(&self) -> Vec<QueuedTaskInfo> {
        self.shared
            .queues
            .lock()
            .classes
            .iter()
            .flatten()
            .map(|task| QueuedTaskInfo {
                id: task.id(),
                class: task.class(),
                score: task.score(),
                anchor: task.anchor(),
            })
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stops the workers after their current task and resolves everything
    /// still queued with `TaskError::Shutdown`. Idempotent.
    pub fn shutdown(&self) {
        let abandoned = {
            let mut queues = self.shared.queues.lock();
            if self.shared.shutdown.swap(true, Ordering::AcqRel) {
                Vec::new()
            } else {
                queues.drain()
            }
        };
        self.shared.work_available.notify_all();

        if !abandoned.is_empty() {
            debug!("Abandoning {} queued tasks on shutdown", abandoned.len());
        }
        for task in abandoned {
            task.abandon();
        }

        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            // The last reference can be dropped from inside a task; never join
            // the thread we are running on.
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::errors::TaskError;
    use std::{
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    fn manual_scheduler() -> PriorityScheduler {
        PriorityScheduler::new(SchedulerConfig {
            worker_count: Some(0),
            rescore_distance: 4.0,
            rescore_interval_ms: 0,
            ..SchedulerConfig::default()
        })
        .unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let task_log = log.clone();
        let make = move |name: &'static str| {
            let log = task_log.clone();
            Box::new(move || log.lock().push(name)) as Box<dyn FnOnce() + Send>
        };
        (log, make)
    }

    fn drain(scheduler: &PriorityScheduler) {
        while scheduler.run_one() {}
    }

    #[test]
    fn urgent_classes_win_regardless_of_score() {
        let scheduler = manual_scheduler();
        let (log, make) = recorder();

        scheduler.schedule(PriorityClass::Lowest, -100, make("lowest"));
        scheduler.schedule(PriorityClass::Normal, 50, make("normal"));
        scheduler.schedule(PriorityClass::Immediate, 1_000, make("immediate"));
        scheduler.schedule(PriorityClass::High, 999, make("high"));

        drain(&scheduler);

        assert_eq!(*log.lock(), vec!["immediate", "high", "normal", "lowest"]);
    }

    #[test]
    fn lowest_score_wins_within_a_class() {
        let scheduler = manual_scheduler();
        let (log, make) = recorder();

        scheduler.schedule(PriorityClass::Normal, 5, make("five"));
        scheduler.schedule(PriorityClass::Normal, 1, make("one-a"));
        scheduler.schedule(PriorityClass::Normal, 9, make("nine"));
        scheduler.schedule(PriorityClass::Normal, 1, make("one-b"));

        drain(&scheduler);

        let order = log.lock().clone();
        assert!(order[0].starts_with("one"));
        assert!(order[1].starts_with("one"));
        assert_eq!(&order[2..], ["five", "nine"]);
    }

    #[test]
    fn every_task_runs_exactly_once_across_workers() {
        let scheduler = PriorityScheduler::new(SchedulerConfig {
            worker_count: Some(4),
            ..SchedulerConfig::default()
        })
        .unwrap();
        let counters: Vec<Arc<AtomicUsize>> = (0..500).map(|_| Arc::new(AtomicUsize::new(0))).collect();

        let handles: Vec<TaskHandle> = counters
            .iter()
            .map(|counter| {
                let counter = counter.clone();
                let class = PriorityClass::ALL[fastrand::usize(..PriorityClass::COUNT)];
                scheduler.schedule(class, fastrand::i32(-50..50), move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in &handles {
            assert_eq!(handle.wait(), Ok(()));
        }
        assert!(counters.iter().all(|counter| counter.load(Ordering::SeqCst) == 1));
        assert_eq!(scheduler.queued_task_count(), 0);
    }

    #[test]
    fn sub_threshold_moves_leave_scores_alone() {
        let scheduler = manual_scheduler();
        scheduler.schedule_at(PriorityClass::Normal, Point3::new(10.0, 0.0, 0.0), || {});
        let before = scheduler.queued_scores();
        assert_eq!(before[0].score, 10);

        assert!(!scheduler.set_observer_position(Point3::new(3.0, 0.0, 0.0)));

        assert_eq!(scheduler.queued_scores(), before);
        assert_eq!(scheduler.observer_position(), Point3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn over_threshold_moves_rescore_every_positioned_task() {
        let scheduler = manual_scheduler();
        let anchors = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(16.0, 0.0, 0.0),
            Point3::new(-8.0, 8.0, 32.0),
        ];
        for anchor in anchors {
            scheduler.schedule_at(PriorityClass::High, anchor, || {});
        }
        scheduler.schedule(PriorityClass::High, 77, || {});

        let observer = Point3::new(30.0, 40.0, 0.0);
        assert!(scheduler.set_observer_position(observer));

        for info in scheduler.queued_scores() {
            match info.anchor {
                Some(anchor) => assert_eq!(
                    info.score,
                    weighted_distance(anchor, observer, Vector3::new(1.0, 1.0, 1.0)).round() as Priority
                ),
                None => assert_eq!(info.score, 77),
            }
        }
    }

    #[test]
    fn rescoring_is_throttled_by_time() {
        let scheduler = PriorityScheduler::new(SchedulerConfig {
            worker_count: Some(0),
            rescore_distance: 1.0,
            rescore_interval_ms: 60_000,
            ..SchedulerConfig::default()
        })
        .unwrap();
        scheduler.schedule_at(PriorityClass::Normal, Point3::new(0.0, 0.0, 0.0), || {});

        assert!(scheduler.set_observer_position(Point3::new(10.0, 0.0, 0.0)));
        assert!(!scheduler.set_observer_position(Point3::new(50.0, 0.0, 0.0)));
        assert_eq!(scheduler.queued_scores()[0].score, 10);
    }

    #[test]
    fn rescoring_resumes_after_the_interval() {
        let scheduler = PriorityScheduler::new(SchedulerConfig {
            worker_count: Some(0),
            rescore_distance: 1.0,
            rescore_interval_ms: 20,
            ..SchedulerConfig::default()
        })
        .unwrap();
        scheduler.schedule_at(PriorityClass::Normal, Point3::new(0.0, 0.0, 0.0), || {});

        assert!(scheduler.set_observer_position(Point3::new(10.0, 0.0, 0.0)));
        thread::sleep(Duration::from_millis(40));
        assert!(scheduler.set_observer_position(Point3::new(50.0, 0.0, 0.0)));
        assert_eq!(scheduler.queued_scores()[0].score, 50);
    }

    #[test]
    fn new_positioned_tasks_use_the_latest_observer() {
        let scheduler = manual_scheduler();
        scheduler.set_observer_position(Point3::new(1.0, 0.0, 0.0));
        scheduler.schedule_at(PriorityClass::Normal, Point3::new(0.0, 0.0, 0.0), || {});

        assert_eq!(scheduler.queued_scores()[0].score, 1);
    }

    #[test]
    fn closer_tasks_run_first_after_the_observer_moves() {
        let scheduler = manual_scheduler();
        let (log, make) = recorder();
        scheduler.schedule_at(PriorityClass::Normal, Point3::new(0.0, 0.0, 0.0), make("origin"));
        scheduler.schedule_at(PriorityClass::Normal, Point3::new(100.0, 0.0, 0.0), make("far"));

        scheduler.set_observer_position(Point3::new(90.0, 0.0, 0.0));
        drain(&scheduler);

        assert_eq!(*log.lock(), vec!["far", "origin"]);
    }

    #[test]
    fn custom_score_functions_replace_distance_ordering() {
        fn height_only(anchor: Point3<f32>, observer: Point3<f32>, _: Vector3<f32>) -> Priority {
            (anchor.y - observer.y).abs().round() as Priority
        }

        let run_order = |score_fn: Option<task::ScoreFn>| {
            let scheduler = manual_scheduler();
            let (log, make) = recorder();
            for (name, anchor) in [
                ("above", Point3::new(0.0, 10.0, 0.0)),
                ("far", Point3::new(100.0, 1.0, 0.0)),
            ] {
                let task = PriorityTask::positioned(PriorityClass::Normal, anchor, make(name));
                scheduler.submit(match score_fn {
                    Some(score_fn) => task.with_score_fn(score_fn),
                    None => task,
                });
            }
            drain(&scheduler);
            let order = log.lock().clone();
            order
        };

        assert_eq!(run_order(None), vec!["above", "far"]);
        assert_eq!(run_order(Some(height_only as task::ScoreFn)), vec!["far", "above"]);
    }

    #[test]
    fn a_panicking_task_does_not_kill_its_worker() {
        let scheduler = PriorityScheduler::new(SchedulerConfig {
            worker_count: Some(1),
            ..SchedulerConfig::default()
        })
        .unwrap();

        let failing = scheduler.schedule(PriorityClass::Normal, 0, || panic!("bad tile"));
        let after = scheduler.schedule(PriorityClass::Normal, 1, || {});

        assert!(matches!(failing.wait(), Err(TaskError::Panicked { .. })));
        assert_eq!(after.wait(), Ok(()));
    }

    #[test]
    fn continuations_run_after_their_predecessor() {
        let scheduler = manual_scheduler();
        let (log, make) = recorder();

        let first = scheduler.schedule(PriorityClass::Low, 0, make("first"));
        let chained_log = log.clone();
        let second = first.then(PriorityClass::Immediate, 0, move |result| {
            assert_eq!(result, Ok(()));
            chained_log.lock().push("second");
        });
        scheduler.schedule(PriorityClass::Normal, 0, make("unrelated"));

        assert_eq!(scheduler.queued_task_count(), 2);
        drain(&scheduler);

        assert_eq!(*log.lock(), vec!["unrelated", "first", "second"]);
        assert_ne!(first.id(), second.id());
        assert_eq!(second.try_result(), Some(Ok(())));
    }

    #[test]
    fn continuations_on_finished_tasks_are_enqueued_immediately() {
        let scheduler = manual_scheduler();
        let first = scheduler.schedule(PriorityClass::Normal, 0, || {});
        drain(&scheduler);

        let second = first.then(PriorityClass::Normal, 0, |_| {});
        assert_eq!(scheduler.queued_task_count(), 1);
        drain(&scheduler);
        assert_eq!(second.try_result(), Some(Ok(())));
    }

    #[test]
    fn continuations_observe_failures() {
        let scheduler = manual_scheduler();
        let failing = scheduler.schedule(PriorityClass::Normal, 0, || panic!("nope"));
        let seen = Arc::new(Mutex::new(None));
        let continuation_seen = seen.clone();
        failing.then(PriorityClass::Normal, 0, move |result| {
            *continuation_seen.lock() = Some(result);
        });

        drain(&scheduler);

        assert!(matches!(*seen.lock(), Some(Err(TaskError::Panicked { .. }))));
    }

    #[test]
    fn shutdown_resolves_queued_tasks() {
        let scheduler = manual_scheduler();
        let queued = scheduler.schedule(PriorityClass::Normal, 0, || {});
        let chained = queued.then(PriorityClass::Normal, 0, |_| {});

        scheduler.shutdown();

        assert_eq!(queued.wait(), Err(TaskError::Shutdown { id: queued.id() }));
        assert_eq!(chained.wait(), Err(TaskError::Shutdown { id: chained.id() }));

        let late = scheduler.schedule(PriorityClass::Normal, 0, || {});
        assert_eq!(late.wait(), Err(TaskError::Shutdown { id: late.id() }));
        assert_eq!(scheduler.queued_task_count(), 0);
    }

    #[test]
    fn class_counts_track_the_queues() {
        let scheduler = manual_scheduler();
        scheduler.schedule(PriorityClass::High, 0, || {});
        scheduler.schedule(PriorityClass::High, 0, || {});
        scheduler.schedule(PriorityClass::Lowest, 0, || {});

        assert_eq!(scheduler.queued_task_counts_by_class(), [0, 2, 0, 0, 1]);
        assert_eq!(scheduler.queued_task_count(), 3);
    }
}

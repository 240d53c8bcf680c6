//! # Priority Tasks
//!
//! This module defines the unit of work the [`PriorityScheduler`](super::PriorityScheduler)
//! runs, and the handle callers keep to observe it.
//!
//! ## Core Components
//! - `PriorityClass`: Coarse urgency bucket, scanned in fixed order
//! - `PriorityTask`: A closure tagged with a class and a score (lower = more urgent)
//! - `Scoring`: How a task's score is derived; fixed, or from an anchor position
//! - `TaskHandle`: Completion handle that can be polled, waited on, or chained
//!
//! ## Task Lifecycle
//! 1. A `PriorityTask` is built and submitted to the scheduler
//! 2. While queued, positioned tasks may be re-scored any number of times
//! 3. A worker removes the task from its queue exactly once
//! 4. The task body runs exactly once (or not at all if cancelled)
//! 5. The handle resolves, and any continuations are enqueued as new tasks

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock, Weak,
    },
    time::Duration,
};

use cgmath::{Point3, Vector3};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::Shared;
use crate::core::CancellationToken;
use crate::engine_state::errors::TaskError;

/// Numeric urgency within a class. Lower runs first.
pub type Priority = i32;

/// Unique id of a task, assigned at construction.
pub type TaskId = u64;

/// Outcome a task's handle resolves to.
pub type TaskResult = Result<(), TaskError>;

/// Computes a positioned task's score from its anchor, the observer position and
/// the scheduler's per-axis weights.
pub type ScoreFn = fn(anchor: Point3<f32>, observer: Point3<f32>, weights: Vector3<f32>) -> Priority;

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Coarse urgency buckets. Every queued task in a more urgent class is preferred
/// over every task in a less urgent one, whatever their scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityClass {
    Immediate,
    High,
    Normal,
    Low,
    Lowest,
}

impl PriorityClass {
    pub const COUNT: usize = 5;

    /// All classes, most urgent first. This is the scheduler's scan order.
    pub const ALL: [PriorityClass; PriorityClass::COUNT] = [
        PriorityClass::Immediate,
        PriorityClass::High,
        PriorityClass::Normal,
        PriorityClass::Low,
        PriorityClass::Lowest,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Weighted euclidean distance between two points.
pub fn weighted_distance(a: Point3<f32>, b: Point3<f32>, weights: Vector3<f32>) -> f32 {
    let offset = b - a;
    let weighted = Vector3::new(
        offset.x * weights.x,
        offset.y * weights.y,
        offset.z * weights.z,
    );
    (weighted.x * weighted.x + weighted.y * weighted.y + weighted.z * weighted.z).sqrt()
}

/// Default [`ScoreFn`]: the weighted distance to the observer, rounded.
pub fn distance_score(anchor: Point3<f32>, observer: Point3<f32>, weights: Vector3<f32>) -> Priority {
    weighted_distance(anchor, observer, weights).round() as Priority
}

/// How a task's score is produced.
#[derive(Clone, Copy)]
pub enum Scoring {
    /// The score given at construction never changes.
    Fixed,
    /// The score is recomputed from a fixed anchor whenever the scheduler
    /// re-scores its queues.
    Positioned { anchor: Point3<f32>, score: ScoreFn },
}

impl fmt::Debug for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scoring::Fixed => f.write_str("Fixed"),
            Scoring::Positioned { anchor, .. } => f
                .debug_struct("Positioned")
                .field("anchor", anchor)
                .finish_non_exhaustive(),
        }
    }
}

/// Shared completion state between a queued task and its handles.
pub(super) struct TaskState {
    id: TaskId,
    anchor: Option<Point3<f32>>,
    completion: Mutex<Completion>,
    completed: Condvar,
    scheduler: OnceLock<Weak<Shared>>,
}

#[derive(Default)]
struct Completion {
    result: Option<TaskResult>,
    continuations: Vec<PriorityTask>,
}

impl TaskState {
    fn new(id: TaskId, anchor: Option<Point3<f32>>) -> Self {
        Self {
            id,
            anchor,
            completion: Mutex::new(Completion::default()),
            completed: Condvar::new(),
            scheduler: OnceLock::new(),
        }
    }

    pub(super) fn bind(&self, scheduler: Weak<Shared>) {
        let _ = self.scheduler.set(scheduler);
    }

    /// Resolves the task and hands back the continuations waiting on it.
    fn complete(&self, result: TaskResult) -> Vec<PriorityTask> {
        let mut completion = self.completion.lock();
        debug_assert!(completion.result.is_none(), "task {} completed twice", self.id);
        completion.result = Some(result);
        let continuations = std::mem::take(&mut completion.continuations);
        drop(completion);
        self.completed.notify_all();
        continuations
    }
}

/// A unit of deferred work tagged with a priority class and score.
///
/// Tasks are consumed when they run, so a task can never execute twice;
/// continuations are always distinct tasks.
///
/// # Examples
/// ```
/// use cgmath::Point3;
/// use tile_scheduler::engine_state::task_management::task::{PriorityClass, PriorityTask};
///
/// let fixed = PriorityTask::new(PriorityClass::Normal, 3, || println!("fixed"));
/// assert_eq!(fixed.score(), 3);
///
/// let positioned =
///     PriorityTask::positioned(PriorityClass::High, Point3::new(8.0, 8.0, 8.0), || {});
/// assert_eq!(positioned.anchor(), Some(Point3::new(8.0, 8.0, 8.0)));
/// ```
pub struct PriorityTask {
    class: PriorityClass,
    score: Priority,
    scoring: Scoring,
    action: Job,
    cancellation: Option<CancellationToken>,
    state: Arc<TaskState>,
}

impl PriorityTask {
    /// Creates a task with a fixed score.
    pub fn new<F>(class: PriorityClass, priority: Priority, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_scoring(class, priority, Scoring::Fixed, Box::new(action))
    }

    /// Creates a task scored by its distance to the observer.
    ///
    /// The initial score is assigned when the task is enqueued, from the
    /// scheduler's observer position at that moment.
    pub fn positioned<F>(class: PriorityClass, anchor: Point3<f32>, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_scoring(
            class,
            Priority::MAX,
            Scoring::Positioned {
                anchor,
                score: distance_score,
            },
            Box::new(action),
        )
    }

    fn with_scoring(class: PriorityClass, score: Priority, scoring: Scoring, action: Job) -> Self {
        let anchor = match scoring {
            Scoring::Positioned { anchor, .. } => Some(anchor),
            Scoring::Fixed => None,
        };
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            class,
            score,
            scoring,
            action,
            cancellation: None,
            state: Arc::new(TaskState::new(id, anchor)),
        }
    }

    /// Replaces the score function of a positioned task. No effect on fixed tasks.
    pub fn with_score_fn(mut self, score_fn: ScoreFn) -> Self {
        if let Scoring::Positioned { score, .. } = &mut self.scoring {
            *score = score_fn;
        }
        self
    }

    /// Attaches a token checked right before the task would run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn id(&self) -> TaskId {
        self.state.id
    }

    pub fn class(&self) -> PriorityClass {
        self.class
    }

    pub fn score(&self) -> Priority {
        self.score
    }

    pub fn anchor(&self) -> Option<Point3<f32>> {
        self.state.anchor
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            state: self.state.clone(),
        }
    }

    pub(super) fn state(&self) -> &Arc<TaskState> {
        &self.state
    }

    /// Recomputes the score from the observer position. Fixed tasks keep their
    /// score.
    pub(super) fn rescore(&mut self, observer: Point3<f32>, weights: Vector3<f32>) {
        if let Scoring::Positioned { anchor, score } = self.scoring {
            self.score = score(anchor, observer, weights);
        }
    }

    /// Runs the task body, resolves the handle, and returns the continuations
    /// that were waiting on it.
    pub(super) fn run(self) -> Vec<PriorityTask> {
        let PriorityTask {
            action,
            cancellation,
            state,
            ..
        } = self;
        let id = state.id;

        let result = if cancellation.is_some_and(|token| token.is_cancelled()) {
            debug!("Task {id} was cancelled before it ran");
            Err(TaskError::Cancelled { id })
        } else {
            panic::catch_unwind(AssertUnwindSafe(action)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!("Task {id} panicked: {message}");
                TaskError::Panicked { id, message }
            })
        };

        state.complete(result)
    }

    /// Resolves the task (and everything chained after it) as dropped by a
    /// shutting-down scheduler.
    pub(super) fn abandon(self) {
        let mut stack = vec![self];
        while let Some(task) = stack.pop() {
            let id = task.id();
            stack.extend(task.state.complete(Err(TaskError::Shutdown { id })));
        }
    }
}

impl fmt::Debug for PriorityTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityTask")
            .field("id", &self.id())
            .field("class", &self.class)
            .field("score", &self.score)
            .field("scoring", &self.scoring)
            .finish_non_exhaustive()
    }
}

/// A handle to a submitted task.
///
/// Handles are cheap to clone; every clone observes the same completion.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.state.id
    }

    /// The anchor of a positioned task, `None` for fixed-score tasks.
    pub fn anchor(&self) -> Option<Point3<f32>> {
        self.state.anchor
    }

    pub fn is_complete(&self) -> bool {
        self.state.completion.lock().result.is_some()
    }

    /// Returns the outcome if the task has finished.
    pub fn try_result(&self) -> Option<TaskResult> {
        self.state.completion.lock().result.clone()
    }

    /// Blocks until the task has finished.
    pub fn wait(&self) -> TaskResult {
        let mut completion = self.state.completion.lock();
        loop {
            if let Some(result) = &completion.result {
                return result.clone();
            }
            self.state.completed.wait(&mut completion);
        }
    }

    /// Blocks until the task has finished or `timeout` elapses.
    ///
    /// # Returns
    /// `None` if the task was still pending when the timeout expired.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult> {
        let deadline = web_time::Instant::now() + timeout;
        let mut completion = self.state.completion.lock();
        loop {
            if let Some(result) = &completion.result {
                return Some(result.clone());
            }
            let now = web_time::Instant::now();
            if now >= deadline {
                return None;
            }
            self.state
                .completed
                .wait_for(&mut completion, deadline - now);
        }
    }

    /// Chains a continuation that runs after this task, receiving its outcome.
    ///
    /// The continuation is a fresh task with its own id and handle. It is
    /// enqueued by the worker that finishes this task, or right away if this
    /// task has already finished.
    ///
    /// # Returns
    /// The continuation's handle. If the scheduler that ran this task is gone,
    /// the returned handle is already resolved with [`TaskError::Shutdown`].
    pub fn then<F>(&self, class: PriorityClass, priority: Priority, continuation: F) -> TaskHandle
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        let predecessor = self.state.clone();
        let task = PriorityTask::new(class, priority, move || {
            let result = predecessor
                .completion
                .lock()
                .result
                .clone()
                .unwrap_or(Err(TaskError::Shutdown { id: predecessor.id }));
            continuation(result);
        });
        let handle = task.handle();

        let Some(shared) = self.state.scheduler.get().and_then(Weak::upgrade) else {
            task.abandon();
            return handle;
        };

        let mut completion = self.state.completion.lock();
        if completion.result.is_some() {
            drop(completion);
            shared.enqueue(task);
        } else {
            task.state.bind(Arc::downgrade(&shared));
            completion.continuations.push(task);
        }
        handle
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Extracts a readable message from a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn classes_scan_most_urgent_first() {
        assert!(PriorityClass::Immediate < PriorityClass::High);
        assert!(PriorityClass::Low < PriorityClass::Lowest);
        for (index, class) in PriorityClass::ALL.iter().enumerate() {
            assert_eq!(class.index(), index);
        }
    }

    #[test]
    fn distance_score_applies_axis_weights() {
        let origin = Point3::new(0.0, 0.0, 0.0);
        let observer = Point3::new(3.0, 10.0, 4.0);

        assert_eq!(distance_score(origin, observer, Vector3::new(1.0, 0.0, 1.0)), 5);
        assert_eq!(distance_score(origin, observer, Vector3::new(0.0, 1.0, 0.0)), 10);
    }

    #[test]
    fn running_consumes_the_task_and_resolves_the_handle() {
        let hits = Arc::new(AtomicUsize::new(0));
        let task_hits = hits.clone();
        let task = PriorityTask::new(PriorityClass::Normal, 0, move || {
            task_hits.fetch_add(1, Ordering::SeqCst);
        });
        let handle = task.handle();
        assert!(!handle.is_complete());

        assert!(task.run().is_empty());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(handle.try_result(), Some(Ok(())));
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn panics_resolve_the_handle_with_the_message() {
        let task = PriorityTask::new(PriorityClass::Normal, 0, || panic!("terrain exploded"));
        let handle = task.handle();

        task.run();

        match handle.wait() {
            Err(TaskError::Panicked { id, message }) => {
                assert_eq!(id, handle.id());
                assert_eq!(message, "terrain exploded");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let task_hits = hits.clone();
        let task = PriorityTask::new(PriorityClass::Normal, 0, move || {
            task_hits.fetch_add(1, Ordering::SeqCst);
        })
        .with_cancellation(token.clone());
        let handle = task.handle();

        token.cancel();
        task.run();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(handle.wait(), Err(TaskError::Cancelled { id: handle.id() }));
    }

    #[test]
    fn wait_timeout_returns_none_while_pending() {
        let task = PriorityTask::new(PriorityClass::Low, 0, || {});
        let handle = task.handle();

        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), None);
        task.run();
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), Some(Ok(())));
    }

    #[test]
    fn then_without_a_scheduler_resolves_as_shutdown() {
        let task = PriorityTask::new(PriorityClass::Low, 0, || {});
        let continuation = task.handle().then(PriorityClass::Low, 0, |_| {});

        assert_eq!(
            continuation.try_result(),
            Some(Err(TaskError::Shutdown {
                id: continuation.id()
            }))
        );
    }

    #[test]
    fn task_ids_are_unique() {
        let a = PriorityTask::new(PriorityClass::Low, 0, || {});
        let b = PriorityTask::new(PriorityClass::Low, 0, || {});
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn rescoring_only_touches_positioned_tasks() {
        let weights = Vector3::new(1.0, 1.0, 1.0);
        let mut fixed = PriorityTask::new(PriorityClass::Normal, 7, || {});
        let mut positioned = PriorityTask::positioned(PriorityClass::Normal, Point3::new(0.0, 0.0, 0.0), || {});

        fixed.rescore(Point3::new(30.0, 40.0, 0.0), weights);
        positioned.rescore(Point3::new(30.0, 40.0, 0.0), weights);

        assert_eq!(fixed.score(), 7);
        assert_eq!(positioned.score(), 50);
    }
}

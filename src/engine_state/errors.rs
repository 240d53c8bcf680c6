//! # Engine Errors
//!
//! Error types shared across the scheduler, the tile grid and the engine facade.
//! Task failures are never swallowed: they resolve the task's completion handle
//! with a [`TaskError`] so anything waiting on the handle observes them.

use std::io;

use super::task_management::task::TaskId;
use super::voxels::tile::TileCoord;

/// Why a scheduled task did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task body panicked. The panic was caught on the worker and the
    /// worker kept running.
    #[error("task {id} panicked: {message}")]
    Panicked { id: TaskId, message: String },

    /// The task's cancellation token fired before a worker picked it up.
    #[error("task {id} was cancelled before it ran")]
    Cancelled { id: TaskId },

    /// The scheduler shut down while the task was still queued.
    #[error("task {id} was dropped because the scheduler shut down")]
    Shutdown { id: TaskId },
}

impl TaskError {
    /// Returns the id of the task this error belongs to.
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskError::Panicked { id, .. }
            | TaskError::Cancelled { id }
            | TaskError::Shutdown { id } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("tile {0:?} is outside of the grid's vertical bounds")]
    OutOfBounds(TileCoord),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("main-thread callbacks can only be drained on the main thread")]
    NotMainThread,
}

/// Errors surfaced while bringing the engine up.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn scheduler worker threads: {0}")]
    Spawn(#[from] io::Error),
}

//! Scheduler error types.

use flotilla_state::{ConnectorError, LaunchError, StateError};
use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("app not found: {0}")]
    AppNotFound(String),

    #[error("app already registered: {0}")]
    AppExists(String),

    #[error("slot {0} has no current task")]
    NoCurrentTask(String),

    /// The slot's current task is still live and has to be killed before
    /// the slot can be launched again.
    #[error("slot {slot_id} is busy with live task {task_id}")]
    SlotBusy { slot_id: String, task_id: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("connector: {0}")]
    Connector(#[from] ConnectorError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

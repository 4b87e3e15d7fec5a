//! Error types for the worker supervisor

use std::time::Duration;
use thiserror::Error;

/// Result type alias for supervisor operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failures a caller of [`crate::Supervisor::call`] can observe.
///
/// Every variant is a resolved outcome: the supervisor never panics or leaves
/// a caller hanging because of a worker fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker executable could not be launched.
    #[error("failed to spawn worker `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    /// No reply arrived before the per-request deadline.
    #[error("processing timed out")]
    Timeout { after: Duration },

    /// The worker answered with a structured error record.
    #[error("worker error: {0}")]
    Worker(String),

    /// The request could not be encoded for the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `max_queue_depth` was reached; the request was never queued.
    #[error("request queue is full ({depth} pending)")]
    QueueFull { depth: usize },

    /// `max_restarts` was exhausted; the service no longer accepts work.
    #[error("worker unavailable after {restarts} failed restarts")]
    Unavailable { restarts: u32 },

    /// The supervisor was shut down before the request resolved.
    #[error("supervisor shut down")]
    ShutDown,

    #[error("IO error: {0}")]
    Io(String),
}

impl WorkerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkerError::Timeout { .. })
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::Io(err.to_string())
    }
}

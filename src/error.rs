//! Error types for the task queue

use thiserror::Error;

/// Result type alias used throughout the crate
pub type DsqResult<T> = Result<T, DsqError>;

/// Errors surfaced by the queue, result store, manager, worker, scheduler and forwarder
#[derive(Error, Debug)]
pub enum DsqError {
    /// Redis connection or command errors
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Envelope encode failure
    #[error("msgpack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Envelope decode failure
    #[error("msgpack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encode/decode failure (HTTP ingress)
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Queue name contained a colon, the schedule-item separator byte
    #[error("queue name must not contain ':': {0:?}")]
    InvalidQueueName(String),

    /// `Manager::push`/`process` hit a name with no registered handler in sync mode
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Raised by a handler (or the worker's timeout race) to unwind the worker loop cleanly
    #[error("stop worker")]
    StopWorker,

    /// A handler's own error, carried through retry/dead-letter bookkeeping
    #[error("task failed: {message}")]
    TaskFailed {
        /// type-name-like tag, used as the `error` field of an error result record
        kind: String,
        message: String,
        trace: String,
    },

    /// IO errors (binding a listener, etc.)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config parsing failure
    #[error("config error: {0}")]
    Config(String),

    /// Catch-all for handler/config errors that don't fit another variant
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DsqError {
    /// Build a [`DsqError::TaskFailed`] from a handler error, capturing a
    /// Python-exception-shaped `(kind, message, trace)` triple.
    pub fn task_failed<S: Into<String>>(kind: S, message: S, trace: S) -> Self {
        DsqError::TaskFailed {
            kind: kind.into(),
            message: message.into(),
            trace: trace.into(),
        }
    }
}

//! Stage failure classification and orchestrator errors.
//!
//! Stage executors translate whatever their remote dependency reports
//! into the three-way `StageError` classification; the orchestrator
//! never inspects remote-specific codes itself.

use std::time::Duration;

use thiserror::Error;

/// A classified stage failure, attributed to one item and one stage.
#[derive(Error, Debug, Clone)]
pub enum StageError {
    /// Network trouble, timeout, rate limit, transient remote error.
    /// Retried with backoff, counted against the attempt budget.
    #[error("retryable remote error: {0}")]
    RetryableRemote(String),

    /// The remote confirmed the resource does not exist. Re-attempting
    /// cannot succeed; the item is parked immediately.
    #[error("remote reports resource absent: {0}")]
    ConfirmedAbsent(String),

    /// Expected structure or content was missing. Retried up to the
    /// ceiling, then parked with the error preserved for triage.
    #[error("unexpected content: {0}")]
    UnexpectedContent(String),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::RetryableRemote(_) => ErrorKind::RetryableRemote,
            StageError::ConfirmedAbsent(_) => ErrorKind::ConfirmedAbsent,
            StageError::UnexpectedContent(_) => ErrorKind::UnexpectedContent,
        }
    }
}

/// Failure classification without the message, as fed to the retry
/// policy and stored on the item row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RetryableRemote,
    ConfirmedAbsent,
    UnexpectedContent,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RetryableRemote => "retryable_remote",
            ErrorKind::ConfirmedAbsent => "confirmed_absent",
            ErrorKind::UnexpectedContent => "unexpected_content",
        }
    }
}

/// Errors that end a scheduling run. Item-level failures never appear
/// here; they are recorded on the item row instead.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("item store unavailable after {0:?} of retries")]
    StoreUnavailable(Duration),

    #[error("database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("no executor registered for stage '{0}'")]
    MissingExecutor(crate::stage::Stage),

    #[error("failed to encode stage payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("worker error: {0}")]
    Worker(#[from] crate::error::WorkerError),
}

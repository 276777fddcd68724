use serde::{Deserialize, Serialize};
use shared::domain::{TaskKey, TestId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionFailure {
    /// The sink answered with an error.
    Rejected,
    /// The sink did not answer within the configured timeout.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("test {0} was not found in the catalog")]
    TestNotFound(TestId),
    #[error("test {test_id} has invalid duration of {minutes} minutes")]
    InvalidDuration { test_id: TestId, minutes: i64 },
    #[error("test {test_id} is malformed: {reason}")]
    MalformedTest { test_id: TestId, reason: String },
    #[error("display name must not be blank")]
    InvalidDisplayName,
    #[error("unknown task key '{0}'")]
    InvalidTaskKey(TaskKey),
    #[error("submission failed ({kind:?}): {message}")]
    SubmissionFailed {
        kind: SubmissionFailure,
        message: String,
    },
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),
    #[error("session has already ended")]
    SessionClosed,
}

/// Coarse error classification exposed to the host in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TestNotFound,
    InvalidDuration,
    MalformedTest,
    InvalidDisplayName,
    InvalidTaskKey,
    SubmissionFailed,
    CatalogUnavailable,
    SessionClosed,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::TestNotFound(_) => ErrorKind::TestNotFound,
            SessionError::InvalidDuration { .. } => ErrorKind::InvalidDuration,
            SessionError::MalformedTest { .. } => ErrorKind::MalformedTest,
            SessionError::InvalidDisplayName => ErrorKind::InvalidDisplayName,
            SessionError::InvalidTaskKey(_) => ErrorKind::InvalidTaskKey,
            SessionError::SubmissionFailed { .. } => ErrorKind::SubmissionFailed,
            SessionError::CatalogUnavailable(_) => ErrorKind::CatalogUnavailable,
            SessionError::SessionClosed => ErrorKind::SessionClosed,
        }
    }
}

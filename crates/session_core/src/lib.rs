use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{TestDefinition, TestId},
    protocol::{SubmissionPayload, SubmissionReceipt},
};

pub mod buffer;
pub mod clock;
pub mod error;
pub mod http_client;
mod session;
pub mod state;
mod storage_backed;

pub use clock::{Clock, ClockHandle, ClockSignal, IntervalClock};
pub use error::{ErrorKind, SessionError, SubmissionFailure};
pub use http_client::HttpBackend;
pub use session::{
    AssessmentSession, IntentOutcome, SessionConfig, SessionDependencies, SessionEvent,
    SessionOutcome,
};
pub use state::{SessionSnapshot, SubmissionStatus, TaskProgress, TerminationCause};
pub use storage_backed::StorageBackend;

/// Resolves test definitions. `Ok(None)` means the test does not exist;
/// `Err` means the catalog could not be asked.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn fetch_test(&self, test_id: TestId) -> Result<Option<TestDefinition>>;
}

/// Persists one transcript per call.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt>;
}

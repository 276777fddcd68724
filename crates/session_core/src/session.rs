use std::{sync::Arc, time::Duration};

use shared::{
    domain::{SessionId, TaskKey, TestDefinition, TestId},
    protocol::{SubmissionPayload, SubmissionReceipt},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, ClockHandle, ClockSignal},
    error::{SessionError, SubmissionFailure},
    state::{SessionSnapshot, SessionState, SubmissionStatus, TerminationCause, Transition},
    CatalogReader, SubmissionSink,
};

const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// A sink call that takes longer than this counts as a failed attempt.
    pub submit_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

#[derive(Clone)]
pub struct SessionDependencies {
    pub catalog: Arc<dyn CatalogReader>,
    pub sink: Arc<dyn SubmissionSink>,
    pub clock: Arc<dyn Clock>,
    pub config: SessionConfig,
}

/// How the session task handled a host intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    Applied,
    /// Drafting is over; the intent was discarded.
    Dropped,
    /// The intent ended drafting and the transcript is being submitted.
    Submitting,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Tick {
        remaining_seconds: u64,
    },
    StatusChanged {
        status: SubmissionStatus,
        cause: Option<TerminationCause>,
    },
    SubmissionFailed {
        error: SessionError,
        retry_allowed: bool,
    },
    Ended(SessionOutcome),
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Submitted {
        receipt: SubmissionReceipt,
        auto_submitted: bool,
    },
    /// The expiry submission failed. The transcript is handed back so the
    /// host can offer a single out-of-band re-submission.
    Failed {
        error: SessionError,
        payload: SubmissionPayload,
    },
    /// The host dropped its handle while drafting.
    Abandoned,
}

enum Command {
    EditContent {
        key: TaskKey,
        text: String,
        reply: oneshot::Sender<Result<IntentOutcome, SessionError>>,
    },
    SetActiveTask {
        key: TaskKey,
        reply: oneshot::Sender<Result<IntentOutcome, SessionError>>,
    },
    RequestSubmit {
        reply: oneshot::Sender<Result<IntentOutcome, SessionError>>,
    },
}

struct SubmissionResult {
    payload: SubmissionPayload,
    result: Result<SubmissionReceipt, SessionError>,
}

/// Host-side handle to one timed session.
///
/// The [`SessionState`] lives inside a single spawned task. Host intents,
/// clock signals and submission results all reach it through channels and
/// are applied one at a time, so the expiry/submit race is decided by
/// arrival order alone.
pub struct AssessmentSession {
    session_id: SessionId,
    definition: TestDefinition,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<SessionOutcome>,
}

impl AssessmentSession {
    /// Resolves the test and starts its countdown. Nothing is created and
    /// no clock is started when this fails.
    pub async fn begin(
        deps: &SessionDependencies,
        test_id: TestId,
        display_name: &str,
    ) -> Result<Self, SessionError> {
        if display_name.trim().is_empty() {
            return Err(SessionError::InvalidDisplayName);
        }

        let definition = deps
            .catalog
            .fetch_test(test_id)
            .await
            .map_err(|err| {
                warn!(test_id = test_id.0, error = %err, "session: catalog lookup failed");
                SessionError::CatalogUnavailable(format!("{err:#}"))
            })?
            .ok_or(SessionError::TestNotFound(test_id))?;

        let state = SessionState::new(&definition, display_name)?;
        let session_id = state.session_id();

        let (clock_tx, clock_rx) = mpsc::unbounded_channel();
        let clock = deps.clock.start(state.total_seconds(), clock_tx);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let (events, _) = broadcast::channel(deps.config.event_capacity.max(1));
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        info!(
            %session_id,
            test_id = test_id.0,
            tasks = definition.tasks.len(),
            total_seconds = state.total_seconds(),
            "session: started"
        );

        let driver = SessionDriver {
            state,
            sink: Arc::clone(&deps.sink),
            submit_timeout: deps.config.submit_timeout,
            clock,
            clock_signals: clock_rx,
            clock_open: true,
            commands: commands_rx,
            outcomes_tx,
            outcomes: outcomes_rx,
            snapshot: snapshot_tx,
            events: events.clone(),
            finished: None,
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            session_id,
            definition,
            commands: commands_tx,
            snapshot: snapshot_rx,
            events,
            task,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn edit_content(
        &self,
        key: impl Into<TaskKey>,
        text: impl Into<String>,
    ) -> Result<IntentOutcome, SessionError> {
        let key = key.into();
        let text = text.into();
        self.send(|reply| Command::EditContent { key, text, reply })
            .await
    }

    pub async fn set_active_task(
        &self,
        key: impl Into<TaskKey>,
    ) -> Result<IntentOutcome, SessionError> {
        let key = key.into();
        self.send(|reply| Command::SetActiveTask { key, reply }).await
    }

    pub async fn request_submit(&self) -> Result<IntentOutcome, SessionError> {
        self.send(|reply| Command::RequestSubmit { reply }).await
    }

    /// Waits until the session reaches a terminal outcome.
    pub async fn wait_for_outcome(self) -> Result<SessionOutcome, SessionError> {
        let Self { commands, task, .. } = self;
        let outcome = task.await.map_err(|_| SessionError::SessionClosed);
        drop(commands);
        outcome
    }

    /// Discards the session. A submission already in flight is still
    /// allowed to finish and its outcome is returned.
    pub async fn abandon(self) -> Result<SessionOutcome, SessionError> {
        let Self { commands, task, .. } = self;
        drop(commands);
        task.await.map_err(|_| SessionError::SessionClosed)
    }

    async fn send(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<IntentOutcome, SessionError>>) -> Command,
    ) -> Result<IntentOutcome, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        reply_rx.await.map_err(|_| SessionError::SessionClosed)?
    }
}

struct SessionDriver {
    state: SessionState,
    sink: Arc<dyn SubmissionSink>,
    submit_timeout: Duration,
    clock: ClockHandle,
    clock_signals: mpsc::UnboundedReceiver<ClockSignal>,
    clock_open: bool,
    commands: mpsc::Receiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<SubmissionResult>,
    outcomes: mpsc::UnboundedReceiver<SubmissionResult>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    finished: Option<SessionOutcome>,
}

impl SessionDriver {
    async fn run(mut self) -> SessionOutcome {
        let mut host_connected = true;
        loop {
            tokio::select! {
                command = self.commands.recv(), if host_connected => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        host_connected = false;
                        if self.state.status() != SubmissionStatus::Submitting {
                            self.finish(SessionOutcome::Abandoned);
                        }
                    }
                },
                signal = self.clock_signals.recv(), if self.clock_open => match signal {
                    Some(signal) => self.handle_clock(signal),
                    None => self.clock_open = false,
                },
                Some(result) = self.outcomes.recv() => {
                    self.handle_submission_result(result);
                    if !host_connected && self.finished.is_none()
                        && self.state.status() != SubmissionStatus::Submitting
                    {
                        self.finish(SessionOutcome::Abandoned);
                    }
                }
            }

            self.snapshot.send_replace(self.state.snapshot());
            if let Some(outcome) = self.finished.take() {
                self.clock.stop();
                let _ = self.events.send(SessionEvent::Ended(outcome.clone()));
                return outcome;
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::EditContent { key, text, reply } => {
                let result = self.state.edit_content(&key, text);
                if let Err(err) = &result {
                    debug!(session_id = %self.state.session_id(), error = %err, "session: edit rejected");
                }
                let _ = reply.send(result.map(|transition| self.apply(transition)));
            }
            Command::SetActiveTask { key, reply } => {
                let result = self.state.set_active_task(&key);
                if result.is_ok() {
                    debug!(session_id = %self.state.session_id(), task_key = %key, "session: active task changed");
                }
                let _ = reply.send(result.map(|transition| self.apply(transition)));
            }
            Command::RequestSubmit { reply } => {
                let transition = self.state.request_submit();
                let _ = reply.send(Ok(self.apply(transition)));
            }
        }
    }

    fn handle_clock(&mut self, signal: ClockSignal) {
        let transition = match signal {
            ClockSignal::Tick { remaining_seconds } => {
                let transition = self.state.tick(remaining_seconds);
                if transition != Transition::Dropped {
                    let _ = self.events.send(SessionEvent::Tick {
                        remaining_seconds: self.state.remaining_seconds(),
                    });
                }
                transition
            }
            ClockSignal::Expired => {
                self.clock_open = false;
                self.state.expire()
            }
        };
        self.apply(transition);
    }

    fn apply(&mut self, transition: Transition) -> IntentOutcome {
        match transition {
            Transition::Applied => IntentOutcome::Applied,
            Transition::Dropped => IntentOutcome::Dropped,
            Transition::BeginSubmission(payload) => {
                self.dispatch_submission(payload);
                IntentOutcome::Submitting
            }
        }
    }

    fn dispatch_submission(&mut self, payload: SubmissionPayload) {
        let cause = self.state.termination_cause();
        info!(
            session_id = %self.state.session_id(),
            test_id = payload.test_id.0,
            ?cause,
            word_count = payload.word_count,
            remaining_seconds = self.state.remaining_seconds(),
            "session: submitting transcript"
        );
        let _ = self.events.send(SessionEvent::StatusChanged {
            status: SubmissionStatus::Submitting,
            cause,
        });

        let sink = Arc::clone(&self.sink);
        let timeout = self.submit_timeout;
        let outcomes = self.outcomes_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, sink.submit(&payload)).await {
                Ok(Ok(receipt)) => Ok(receipt),
                Ok(Err(err)) => Err(SessionError::SubmissionFailed {
                    kind: SubmissionFailure::Rejected,
                    message: format!("{err:#}"),
                }),
                Err(_) => Err(SessionError::SubmissionFailed {
                    kind: SubmissionFailure::TimedOut,
                    message: format!("no answer within {} ms", timeout.as_millis()),
                }),
            };
            let _ = outcomes.send(SubmissionResult { payload, result });
        });
    }

    fn handle_submission_result(&mut self, SubmissionResult { payload, result }: SubmissionResult) {
        let session_id = self.state.session_id();
        match result {
            Ok(receipt) => {
                if self.state.record_submission_success() == Transition::Dropped {
                    return;
                }
                info!(
                    %session_id,
                    submission_id = receipt.submission_id.0,
                    auto_submitted = payload.auto_submitted,
                    "session: transcript submitted"
                );
                let _ = self.events.send(SessionEvent::StatusChanged {
                    status: SubmissionStatus::Submitted,
                    cause: self.state.termination_cause(),
                });
                self.finish(SessionOutcome::Submitted {
                    receipt,
                    auto_submitted: payload.auto_submitted,
                });
            }
            Err(error) => {
                let transition = self.state.record_submission_failure();
                if transition == Transition::Dropped {
                    return;
                }
                let status = self.state.status();
                warn!(%session_id, ?status, error = %error, "session: submission failed");
                let _ = self.events.send(SessionEvent::SubmissionFailed {
                    error: error.clone(),
                    retry_allowed: status == SubmissionStatus::Drafting,
                });
                if status == SubmissionStatus::Failed {
                    self.finish(SessionOutcome::Failed { error, payload });
                    return;
                }
                // A restarted submission announces its own status change.
                if !matches!(transition, Transition::BeginSubmission(_)) {
                    let _ = self.events.send(SessionEvent::StatusChanged {
                        status,
                        cause: self.state.termination_cause(),
                    });
                }
                self.apply(transition);
            }
        }
    }

    fn finish(&mut self, outcome: SessionOutcome) {
        self.clock.stop();
        self.finished = Some(outcome);
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;

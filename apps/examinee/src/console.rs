//! Line-oriented host UI for a single assessment session.
//!
//! Plain lines are appended to the active task. Lines starting with `:`
//! are commands; `::` escapes a literal leading colon.

use std::{collections::HashMap, io::Write, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use session_core::{
    AssessmentSession, IntentOutcome, SessionError, SessionEvent, SessionOutcome,
    SessionSnapshot, SubmissionSink, SubmissionStatus, TerminationCause,
};
use shared::{
    domain::{TaskKey, TestDefinition},
    protocol::{SubmissionPayload, SubmissionReceipt},
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, Lines},
    sync::broadcast::error::RecvError,
};
use tracing::warn;

/// Seconds below which every tick is announced.
const FINAL_STRETCH_SECONDS: u64 = 5 * 60;

const HELP: &str = "Type to write into the active task.\n\
    :task <key>  switch task\n\
    :status      show time and word counts\n\
    :clear       empty the active task\n\
    :submit      submit all tasks\n\
    :help        show this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    SwitchTask(TaskKey),
    Submit,
    Status,
    Clear,
    Help,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    if let Some(escaped) = line.strip_prefix("::") {
        return Input::Text(format!(":{escaped}"));
    }
    let Some(command) = line.strip_prefix(':') else {
        return Input::Text(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("task"), Some(key)) => Input::SwitchTask(TaskKey::new(key)),
        (Some("submit"), None) => Input::Submit,
        (Some("status"), None) => Input::Status,
        (Some("clear"), None) => Input::Clear,
        (Some("help"), None) => Input::Help,
        _ => Input::Unknown(line.to_string()),
    }
}

pub fn format_remaining(remaining_seconds: u64) -> String {
    format!("{:02}:{:02}", remaining_seconds / 60, remaining_seconds % 60)
}

/// Whole minutes are always announced, then every second of the final
/// five minutes.
pub fn should_announce(remaining_seconds: u64) -> bool {
    remaining_seconds % 60 == 0 || remaining_seconds <= FINAL_STRETCH_SECONDS
}

pub struct Console<R, W> {
    input: Lines<R>,
    input_open: bool,
    out: W,
    /// Mirror of the session buffers. Only updated once the session has
    /// applied the edit.
    drafts: HashMap<TaskKey, String>,
    active: TaskKey,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(input: R, out: W, definition: &TestDefinition) -> Self {
        let active = definition
            .tasks
            .first()
            .map(|task| task.key.clone())
            .unwrap_or_else(|| TaskKey::new(shared::domain::DEFAULT_TASK_KEY));
        Self {
            input: input.lines(),
            input_open: true,
            out,
            drafts: HashMap::new(),
            active,
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Drives the session until it ends. Returns the receipt of whichever
    /// submission was finally recorded, if any.
    pub async fn run(
        &mut self,
        session: AssessmentSession,
        sink: Arc<dyn SubmissionSink>,
        submit_timeout: Duration,
    ) -> Result<Option<SubmissionReceipt>> {
        let mut events = session.subscribe_events();
        self.print_intro(session.definition(), &session.snapshot())?;

        loop {
            tokio::select! {
                line = self.input.next_line(), if self.input_open => {
                    match line.context("failed to read input")? {
                        Some(line) => self.handle_line(&session, &line).await?,
                        None => {
                            self.input_open = false;
                            writeln!(self.out, "Input closed, submitting.")?;
                            self.report(session.request_submit().await)?;
                        }
                    }
                }
                event = events.recv() => match event {
                    Ok(SessionEvent::Ended(_)) | Err(RecvError::Closed) => break,
                    Ok(event) => self.show_event(event)?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "console: dropped session events");
                    }
                }
            }
        }

        let outcome = session
            .wait_for_outcome()
            .await
            .context("session task ended unexpectedly")?;
        match outcome {
            SessionOutcome::Submitted {
                receipt,
                auto_submitted,
            } => {
                let label = if auto_submitted {
                    "Submitted automatically"
                } else {
                    "Submitted"
                };
                writeln!(self.out, "{label} (submission #{}).", receipt.submission_id)?;
                Ok(Some(receipt))
            }
            SessionOutcome::Failed { error, payload } => {
                writeln!(self.out, "Your answers could not be submitted: {error}")?;
                self.offer_resubmission(&payload, sink.as_ref(), submit_timeout)
                    .await
            }
            SessionOutcome::Abandoned => Ok(None),
        }
    }

    /// One out-of-band attempt after the session itself gave up. The
    /// transcript is printed if that attempt fails too.
    pub async fn offer_resubmission(
        &mut self,
        payload: &SubmissionPayload,
        sink: &dyn SubmissionSink,
        submit_timeout: Duration,
    ) -> Result<Option<SubmissionReceipt>> {
        writeln!(self.out, "Try submitting once more? [y/N]")?;
        let answer = if self.input_open {
            self.input.next_line().await.context("failed to read input")?
        } else {
            None
        };

        if matches!(answer.as_deref().map(str::trim), Some("y" | "Y" | "yes")) {
            match tokio::time::timeout(submit_timeout, sink.submit(payload)).await {
                Ok(Ok(receipt)) => {
                    writeln!(
                        self.out,
                        "Submitted (submission #{}).",
                        receipt.submission_id
                    )?;
                    return Ok(Some(receipt));
                }
                Ok(Err(err)) => writeln!(self.out, "Second attempt failed: {err:#}")?,
                Err(_) => writeln!(self.out, "Second attempt timed out.")?,
            }
        }

        writeln!(
            self.out,
            "Please hand this transcript to the invigilator:\n\n{}",
            payload.content
        )?;
        Ok(None)
    }

    async fn handle_line(&mut self, session: &AssessmentSession, line: &str) -> Result<()> {
        match parse_input(line) {
            Input::Text(text) => {
                let current = self.drafts.get(&self.active).map_or("", String::as_str);
                let content = if current.is_empty() {
                    text
                } else {
                    format!("{current}\n{text}")
                };
                let result = session
                    .edit_content(self.active.clone(), content.clone())
                    .await;
                if result == Ok(IntentOutcome::Applied) {
                    self.drafts.insert(self.active.clone(), content);
                }
                self.report(result)?;
            }
            Input::SwitchTask(key) => {
                let result = session.set_active_task(key.clone()).await;
                if result == Ok(IntentOutcome::Applied) {
                    self.active = key;
                    if let Some(task) = session.definition().task(&self.active) {
                        writeln!(self.out, "[{}] {}", task.key.label(), task.prompt)?;
                    }
                }
                self.report(result)?;
            }
            Input::Clear => {
                let result = session.edit_content(self.active.clone(), "").await;
                if result == Ok(IntentOutcome::Applied) {
                    self.drafts.remove(&self.active);
                }
                self.report(result)?;
            }
            Input::Submit => self.report(session.request_submit().await)?,
            Input::Status => self.print_status(&session.snapshot())?,
            Input::Help => writeln!(self.out, "{HELP}")?,
            Input::Unknown(raw) => writeln!(self.out, "Unknown command {raw:?}, try :help")?,
        }
        Ok(())
    }

    fn report(&mut self, result: Result<IntentOutcome, SessionError>) -> Result<()> {
        match result {
            Ok(IntentOutcome::Applied) => {}
            Ok(IntentOutcome::Submitting) => writeln!(self.out, "Submitting...")?,
            Ok(IntentOutcome::Dropped) => {
                writeln!(self.out, "Writing has ended; input ignored.")?
            }
            Err(SessionError::SessionClosed) => {}
            Err(err) => writeln!(self.out, "{err}")?,
        }
        Ok(())
    }

    fn show_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Tick { remaining_seconds } if should_announce(remaining_seconds) => {
                writeln!(self.out, "[{} remaining]", format_remaining(remaining_seconds))?;
            }
            SessionEvent::StatusChanged {
                status: SubmissionStatus::Submitting,
                cause: Some(TerminationCause::TimeExpired),
            } => writeln!(self.out, "Time is up. Submitting your answers...")?,
            SessionEvent::SubmissionFailed {
                error,
                retry_allowed,
            } => {
                writeln!(self.out, "Submission failed: {error}")?;
                if retry_allowed {
                    writeln!(self.out, "Your work is kept. Use :submit to try again.")?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn print_intro(&mut self, definition: &TestDefinition, snapshot: &SessionSnapshot) -> Result<()> {
        writeln!(
            self.out,
            "{} ({} minutes), good luck {}.",
            definition.title, definition.duration_minutes, snapshot.display_name
        )?;
        for task in &definition.tasks {
            writeln!(self.out, "\n[{}] {}", task.key.label(), task.prompt)?;
            if let Some(url) = &task.image_url {
                writeln!(self.out, "image: {url}")?;
            }
        }
        writeln!(self.out, "\n{HELP}\n")?;
        writeln!(
            self.out,
            "[{} remaining] writing {}",
            format_remaining(snapshot.remaining_seconds),
            snapshot.active_task
        )?;
        Ok(())
    }

    fn print_status(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        writeln!(
            self.out,
            "{} remaining, active task {}, {:?}",
            format_remaining(snapshot.remaining_seconds),
            snapshot.active_task,
            snapshot.status
        )?;
        for task in &snapshot.tasks {
            writeln!(self.out, "  {}: {} words", task.key, task.word_count)?;
        }
        writeln!(self.out, "  total: {} words", snapshot.total_word_count)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;

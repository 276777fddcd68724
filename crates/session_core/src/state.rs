//! The assessment state machine.
//!
//! `Drafting -> Submitting -> {Submitted | Failed}`. Every path out of
//! `Drafting` goes through [`SessionState::begin_submission`], the single
//! guarded check-and-set on the termination cause. Whichever of expiry or
//! manual submit reaches it first wins; the other is dropped.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{SessionId, TaskKey, TestDefinition, TestId},
    protocol::SubmissionPayload,
};

use crate::{
    buffer::TaskBuffer,
    error::{ErrorKind, SessionError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Drafting,
    Submitting,
    Submitted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    Manual,
    TimeExpired,
}

/// What applying one intent did to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The intent arrived outside `Drafting` and was discarded.
    Dropped,
    /// Drafting ended. The payload must reach the sink exactly once.
    BeginSubmission(SubmissionPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub key: TaskKey,
    pub word_count: usize,
}

/// Read-only view handed to the host after every applied intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub test_id: TestId,
    pub title: String,
    pub display_name: String,
    pub remaining_seconds: u64,
    pub active_task: TaskKey,
    pub tasks: Vec<TaskProgress>,
    pub total_word_count: usize,
    pub status: SubmissionStatus,
    pub termination_cause: Option<TerminationCause>,
    pub last_error: Option<ErrorKind>,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: SessionId,
    display_name: String,
    test_id: TestId,
    title: String,
    duration_minutes: i64,
    task_order: Vec<TaskKey>,
    buffers: HashMap<TaskKey, TaskBuffer>,
    active_task: TaskKey,
    remaining_seconds: u64,
    status: SubmissionStatus,
    termination_cause: Option<TerminationCause>,
    last_error: Option<ErrorKind>,
    attempts: u32,
}

impl SessionState {
    pub fn new(definition: &TestDefinition, display_name: &str) -> Result<Self, SessionError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SessionError::InvalidDisplayName);
        }

        let invalid_duration = || SessionError::InvalidDuration {
            test_id: definition.id,
            minutes: definition.duration_minutes,
        };
        if definition.duration_minutes <= 0 {
            return Err(invalid_duration());
        }
        let total_seconds = u64::try_from(definition.duration_minutes)
            .ok()
            .and_then(|minutes| minutes.checked_mul(60))
            .ok_or_else(invalid_duration)?;

        let Some(first) = definition.tasks.first() else {
            return Err(SessionError::MalformedTest {
                test_id: definition.id,
                reason: "test defines no tasks".to_string(),
            });
        };

        let mut seen = HashSet::new();
        for task in &definition.tasks {
            if !seen.insert(&task.key) {
                return Err(SessionError::MalformedTest {
                    test_id: definition.id,
                    reason: format!("task key '{}' appears more than once", task.key),
                });
            }
        }

        let task_order: Vec<TaskKey> = definition.tasks.iter().map(|t| t.key.clone()).collect();
        let buffers = task_order
            .iter()
            .map(|key| (key.clone(), TaskBuffer::new(key.clone())))
            .collect();

        Ok(Self {
            session_id: SessionId::new(),
            display_name: display_name.to_string(),
            test_id: definition.id,
            title: definition.title.clone(),
            duration_minutes: definition.duration_minutes,
            active_task: first.key.clone(),
            task_order,
            buffers,
            remaining_seconds: total_seconds,
            status: SubmissionStatus::Drafting,
            termination_cause: None,
            last_error: None,
            attempts: 0,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn test_id(&self) -> TestId {
        self.test_id
    }

    pub fn total_seconds(&self) -> u64 {
        // Checked in `new`.
        self.duration_minutes as u64 * 60
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    pub fn termination_cause(&self) -> Option<TerminationCause> {
        self.termination_cause
    }

    pub fn active_task(&self) -> &TaskKey {
        &self.active_task
    }

    pub fn task_keys(&self) -> &[TaskKey] {
        &self.task_order
    }

    pub fn buffer(&self, key: &TaskKey) -> Option<&TaskBuffer> {
        self.buffers.get(key)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SubmissionStatus::Submitted | SubmissionStatus::Failed
        )
    }

    pub fn edit_content(
        &mut self,
        key: &TaskKey,
        text: impl Into<String>,
    ) -> Result<Transition, SessionError> {
        if self.status != SubmissionStatus::Drafting {
            return Ok(Transition::Dropped);
        }
        let Some(buffer) = self.buffers.get_mut(key) else {
            return Err(self.reject_task_key(key));
        };
        buffer.set_content(text);
        self.clear_task_key_error();
        Ok(Transition::Applied)
    }

    pub fn set_active_task(&mut self, key: &TaskKey) -> Result<Transition, SessionError> {
        if self.status != SubmissionStatus::Drafting {
            return Ok(Transition::Dropped);
        }
        if !self.buffers.contains_key(key) {
            return Err(self.reject_task_key(key));
        }
        self.active_task = key.clone();
        self.clear_task_key_error();
        Ok(Transition::Applied)
    }

    /// Applies a clock reading. Remaining time never increases. Reaching
    /// zero while drafting ends drafting with [`TerminationCause::TimeExpired`].
    ///
    /// While a submission is in flight the reading is still recorded so a
    /// failed manual attempt knows whether time ran out meanwhile.
    pub fn tick(&mut self, remaining_seconds: u64) -> Transition {
        match self.status {
            SubmissionStatus::Drafting => {
                self.remaining_seconds = self.remaining_seconds.min(remaining_seconds);
                if self.remaining_seconds == 0 {
                    return self.begin_submission(TerminationCause::TimeExpired);
                }
                Transition::Applied
            }
            SubmissionStatus::Submitting => {
                self.remaining_seconds = self.remaining_seconds.min(remaining_seconds);
                Transition::Applied
            }
            SubmissionStatus::Submitted | SubmissionStatus::Failed => Transition::Dropped,
        }
    }

    pub fn expire(&mut self) -> Transition {
        self.tick(0)
    }

    pub fn request_submit(&mut self) -> Transition {
        self.begin_submission(TerminationCause::Manual)
    }

    fn begin_submission(&mut self, cause: TerminationCause) -> Transition {
        if self.status != SubmissionStatus::Drafting || self.termination_cause.is_some() {
            return Transition::Dropped;
        }
        self.termination_cause = Some(cause);
        self.status = SubmissionStatus::Submitting;
        self.attempts += 1;
        self.last_error = None;
        Transition::BeginSubmission(self.payload())
    }

    pub fn record_submission_success(&mut self) -> Transition {
        if self.status != SubmissionStatus::Submitting {
            return Transition::Dropped;
        }
        self.status = SubmissionStatus::Submitted;
        Transition::Applied
    }

    /// A failed expiry submission is terminal. A failed manual submission
    /// rolls back to `Drafting` with every buffer intact and the cause
    /// cleared so the user can retry; if the countdown reached zero while
    /// the attempt was in flight, the retry is started immediately as an
    /// expiry submission.
    pub fn record_submission_failure(&mut self) -> Transition {
        if self.status != SubmissionStatus::Submitting {
            return Transition::Dropped;
        }
        self.last_error = Some(ErrorKind::SubmissionFailed);
        match self.termination_cause {
            Some(TerminationCause::Manual) => {
                self.status = SubmissionStatus::Drafting;
                self.termination_cause = None;
                if self.remaining_seconds == 0 {
                    return self.begin_submission(TerminationCause::TimeExpired);
                }
                Transition::Applied
            }
            Some(TerminationCause::TimeExpired) | None => {
                self.status = SubmissionStatus::Failed;
                Transition::Applied
            }
        }
    }

    /// Task contents in task order, each under its `=== TASK N ===` heading.
    pub fn transcript(&self) -> String {
        self.task_order
            .iter()
            .map(|key| {
                let content = self.buffers.get(key).map_or("", TaskBuffer::content);
                format!("=== {} ===\n\n{content}", key.label())
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn total_word_count(&self) -> usize {
        self.buffers.values().map(TaskBuffer::word_count).sum()
    }

    pub fn payload(&self) -> SubmissionPayload {
        SubmissionPayload {
            test_id: self.test_id,
            display_name: self.display_name.clone(),
            content: self.transcript(),
            word_count: self.total_word_count(),
            auto_submitted: self.termination_cause == Some(TerminationCause::TimeExpired),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            test_id: self.test_id,
            title: self.title.clone(),
            display_name: self.display_name.clone(),
            remaining_seconds: self.remaining_seconds,
            active_task: self.active_task.clone(),
            tasks: self
                .task_order
                .iter()
                .map(|key| TaskProgress {
                    key: key.clone(),
                    word_count: self.buffers.get(key).map_or(0, TaskBuffer::word_count),
                })
                .collect(),
            total_word_count: self.total_word_count(),
            status: self.status,
            termination_cause: self.termination_cause,
            last_error: self.last_error,
            attempts: self.attempts,
        }
    }

    fn reject_task_key(&mut self, key: &TaskKey) -> SessionError {
        self.last_error = Some(ErrorKind::InvalidTaskKey);
        SessionError::InvalidTaskKey(key.clone())
    }

    /// A submission failure stays visible until the next attempt.
    fn clear_task_key_error(&mut self) {
        if self.last_error == Some(ErrorKind::InvalidTaskKey) {
            self.last_error = None;
        }
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{SubmissionId, TaskSpec, TestId},
    error::{ApiException, ErrorCode},
};

/// Transcript handed to the submission sink, exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub test_id: TestId,
    pub display_name: String,
    pub content: String,
    pub word_count: usize,
    pub auto_submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub submission_id: SubmissionId,
    pub submitted_at: DateTime<Utc>,
}

/// A stored submission as seen by a reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: SubmissionId,
    pub test_id: TestId,
    /// `None` once the test has been removed from the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub content: String,
    pub word_count: usize,
    pub auto_submitted: bool,
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn student_label(&self) -> &str {
        self.student_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("Anonymous")
    }

    pub fn test_label(&self) -> &str {
        self.test_title.as_deref().unwrap_or("Deleted Test")
    }

    pub fn kind_label(&self) -> &'static str {
        if self.auto_submitted {
            "Auto"
        } else {
            "Manual"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSummary {
    pub test_id: TestId,
    pub title: String,
    pub duration_minutes: i64,
    pub task_count: usize,
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Body of catalog create and update requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDraft {
    pub title: String,
    pub duration_minutes: i64,
    pub tasks: Vec<TaskSpec>,
}

impl TestDraft {
    /// Rejects drafts that could never start a session.
    pub fn validate(&self) -> Result<(), ApiException> {
        let invalid = |message: String| -> Result<(), ApiException> {
            Err(ApiException::new(ErrorCode::Validation, message))
        };

        if self.title.trim().is_empty() {
            return invalid("title must not be empty".into());
        }
        if self.duration_minutes <= 0 {
            return invalid(format!(
                "duration must be positive, got {} minutes",
                self.duration_minutes
            ));
        }
        if self.tasks.is_empty() {
            return invalid("a test needs at least one task".into());
        }

        let mut keys = HashSet::new();
        for task in &self.tasks {
            if task.key.as_str().trim().is_empty() {
                return invalid("task keys must not be empty".into());
            }
            if !keys.insert(task.key.as_str()) {
                return invalid(format!("duplicate task key '{}'", task.key));
            }
            if task.prompt.trim().is_empty() {
                return invalid(format!("task '{}' has an empty prompt", task.key));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTestResponse {
    pub test_id: TestId,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;

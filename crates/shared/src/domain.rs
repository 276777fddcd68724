use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(TestId);
id_newtype!(SubmissionId);

/// Key used for the single task of a legacy, unstructured test.
pub const DEFAULT_TASK_KEY: &str = "task1";

/// Identifies one task within a test, e.g. `task1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing decimal number of the key, if any (`task12` -> 12).
    pub fn ordinal(&self) -> Option<u32> {
        let digits_start = self
            .0
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(idx, _)| idx)?;
        self.0[digits_start..].parse().ok()
    }

    /// Section heading used in transcripts: `task2` becomes `TASK 2`.
    pub fn label(&self) -> String {
        match (self.0.strip_prefix("task"), self.ordinal()) {
            (Some(rest), Some(ordinal)) if rest == ordinal.to_string() => {
                format!("TASK {ordinal}")
            }
            _ => self.0.to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub key: TaskKey,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A test as resolved from the catalog. Tasks are in presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: TestId,
    pub title: String,
    pub duration_minutes: i64,
    pub tasks: Vec<TaskSpec>,
}

impl TestDefinition {
    pub fn task(&self, key: &TaskKey) -> Option<&TaskSpec> {
        self.tasks.iter().find(|task| &task.key == key)
    }
}

/// Random per-session identifier, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;

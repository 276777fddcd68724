use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{SubmissionId, TaskKey, TaskSpec, TestDefinition, TestId, DEFAULT_TASK_KEY},
    protocol::{SubmissionPayload, SubmissionReceipt, SubmissionRecord, TestDraft, TestSummary},
};

const PREVIEW_CHARS: usize = 50;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Row of the `tests` table. `description` holds a JSON task document, or
/// plain prompt text for legacy single-task tests.
#[derive(Debug, Clone)]
pub struct StoredTest {
    pub test_id: TestId,
    pub title: String,
    pub description: String,
    pub duration_minutes: i64,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredTest {
    pub fn tasks(&self) -> Vec<TaskSpec> {
        decode_tasks(&self.description, self.image_url.as_deref())
    }

    pub fn summary(&self) -> TestSummary {
        let tasks = self.tasks();
        let preview = tasks
            .first()
            .map(|task| preview_text(&task.prompt))
            .unwrap_or_default();
        TestSummary {
            test_id: self.test_id,
            title: self.title.clone(),
            duration_minutes: self.duration_minutes,
            task_count: tasks.len(),
            preview,
            image_url: self.image_url.clone(),
            created_at: self.created_at,
        }
    }

    pub fn into_definition(self) -> TestDefinition {
        let tasks = self.tasks();
        TestDefinition {
            id: self.test_id,
            title: self.title,
            duration_minutes: self.duration_minutes,
            tasks,
        }
    }
}

/// One entry of the task document. The document is a JSON array, so
/// presentation order is whatever order the draft listed.
#[derive(Debug, Serialize, Deserialize)]
struct TaskDocumentEntry {
    key: String,
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
}

/// Older rows keyed the document by task key, e.g. `{"task1": {...}}`.
#[derive(Debug, Deserialize)]
struct KeyedTaskEntry {
    description: String,
    #[serde(default)]
    image_url: Option<String>,
}

/// Encodes tasks into the `(description, image_url)` column pair.
///
/// The image column always carries the first task's image, which the
/// catalog listing uses as the card image.
pub fn encode_tasks(tasks: &[TaskSpec]) -> Result<(String, Option<String>)> {
    let image_url = tasks.first().and_then(|task| task.image_url.clone());
    let document: Vec<TaskDocumentEntry> = tasks
        .iter()
        .map(|task| TaskDocumentEntry {
            key: task.key.as_str().to_string(),
            description: task.prompt.clone(),
            image_url: task.image_url.clone(),
        })
        .collect();
    let description =
        serde_json::to_string(&document).context("failed to encode task document")?;
    Ok((description, image_url))
}

/// Inverse of [`encode_tasks`]. Also reads the older keyed document, whose
/// tasks are ordered by trailing task number, and plain text, which is the
/// prompt of a single implicit task.
pub fn decode_tasks(description: &str, image_url: Option<&str>) -> Vec<TaskSpec> {
    if let Ok(document) = serde_json::from_str::<Vec<TaskDocumentEntry>>(description) {
        if !document.is_empty() {
            return document
                .into_iter()
                .map(|entry| TaskSpec {
                    key: TaskKey::new(entry.key),
                    prompt: entry.description,
                    image_url: entry.image_url,
                })
                .collect();
        }
    }

    match serde_json::from_str::<BTreeMap<String, KeyedTaskEntry>>(description) {
        Ok(document) if !document.is_empty() => {
            let mut tasks: Vec<TaskSpec> = document
                .into_iter()
                .map(|(key, entry)| TaskSpec {
                    key: TaskKey::new(key),
                    prompt: entry.description,
                    image_url: entry.image_url,
                })
                .collect();
            tasks.sort_by(|a, b| {
                let a_rank = a.key.ordinal().unwrap_or(u32::MAX);
                let b_rank = b.key.ordinal().unwrap_or(u32::MAX);
                a_rank.cmp(&b_rank).then_with(|| a.key.cmp(&b.key))
            });
            tasks
        }
        _ => vec![TaskSpec {
            key: TaskKey::new(DEFAULT_TASK_KEY),
            prompt: description.to_string(),
            image_url: image_url.map(str::to_string),
        }],
    }
}

fn preview_text(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `:memory:` opens a fresh database.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_test(&self, draft: &TestDraft) -> Result<TestId> {
        let (description, image_url) = encode_tasks(&draft.tasks)?;
        let rec = sqlx::query(
            "INSERT INTO tests (title, description, duration_minutes, image_url, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&draft.title)
        .bind(description)
        .bind(draft.duration_minutes)
        .bind(image_url)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("failed to insert test")?;
        Ok(TestId(rec.get::<i64, _>(0)))
    }

    /// Returns `false` when no test has the given id.
    pub async fn update_test(&self, test_id: TestId, draft: &TestDraft) -> Result<bool> {
        let (description, image_url) = encode_tasks(&draft.tasks)?;
        let result = sqlx::query(
            "UPDATE tests SET title = ?, description = ?, duration_minutes = ?, image_url = ?
             WHERE id = ?",
        )
        .bind(&draft.title)
        .bind(description)
        .bind(draft.duration_minutes)
        .bind(image_url)
        .bind(test_id.0)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update test {test_id}"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_test(&self, test_id: TestId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tests WHERE id = ?")
            .bind(test_id.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete test {test_id}"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Newest first.
    pub async fn list_tests(&self) -> Result<Vec<StoredTest>> {
        let rows = sqlx::query(
            "SELECT id, title, description, duration_minutes, image_url, created_at
             FROM tests
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list tests")?;
        Ok(rows.iter().map(stored_test_from_row).collect())
    }

    pub async fn load_test(&self, test_id: TestId) -> Result<Option<StoredTest>> {
        let row = sqlx::query(
            "SELECT id, title, description, duration_minutes, image_url, created_at
             FROM tests
             WHERE id = ?",
        )
        .bind(test_id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load test {test_id}"))?;
        Ok(row.as_ref().map(stored_test_from_row))
    }

    pub async fn insert_submission(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt> {
        let submitted_at = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO submissions (test_id, student_name, content, word_count, auto_submitted, submitted_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(payload.test_id.0)
        .bind(Some(payload.display_name.as_str()).filter(|name| !name.trim().is_empty()))
        .bind(&payload.content)
        .bind(i64::try_from(payload.word_count).unwrap_or(i64::MAX))
        .bind(payload.auto_submitted)
        .bind(submitted_at)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert submission for test {}", payload.test_id))?;
        Ok(SubmissionReceipt {
            submission_id: SubmissionId(rec.get::<i64, _>(0)),
            submitted_at,
        })
    }

    /// Newest first, joined with the current test titles.
    pub async fn list_submissions(&self) -> Result<Vec<SubmissionRecord>> {
        let rows = sqlx::query(
            "SELECT s.id, s.test_id, t.title, s.student_name, s.content, s.word_count, s.auto_submitted, s.submitted_at
             FROM submissions s
             LEFT JOIN tests t ON t.id = s.test_id
             ORDER BY s.submitted_at DESC, s.id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list submissions")?;
        Ok(rows.iter().map(submission_from_row).collect())
    }

    pub async fn load_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<Option<SubmissionRecord>> {
        let row = sqlx::query(
            "SELECT s.id, s.test_id, t.title, s.student_name, s.content, s.word_count, s.auto_submitted, s.submitted_at
             FROM submissions s
             LEFT JOIN tests t ON t.id = s.test_id
             WHERE s.id = ?",
        )
        .bind(submission_id.0)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load submission {submission_id}"))?;
        Ok(row.as_ref().map(submission_from_row))
    }

    pub async fn delete_submission(&self, submission_id: SubmissionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM submissions WHERE id = ?")
            .bind(submission_id.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete submission {submission_id}"))?;
        Ok(result.rows_affected() > 0)
    }
}

fn stored_test_from_row(r: &SqliteRow) -> StoredTest {
    StoredTest {
        test_id: TestId(r.get::<i64, _>(0)),
        title: r.get::<String, _>(1),
        description: r.get::<String, _>(2),
        duration_minutes: r.get::<i64, _>(3),
        image_url: r.get::<Option<String>, _>(4),
        created_at: r.get::<DateTime<Utc>, _>(5),
    }
}

fn submission_from_row(r: &SqliteRow) -> SubmissionRecord {
    SubmissionRecord {
        submission_id: SubmissionId(r.get::<i64, _>(0)),
        test_id: TestId(r.get::<i64, _>(1)),
        test_title: r.get::<Option<String>, _>(2),
        student_name: r.get::<Option<String>, _>(3),
        content: r.get::<String, _>(4),
        word_count: usize::try_from(r.get::<i64, _>(5)).unwrap_or_default(),
        auto_submitted: r.get::<bool, _>(6),
        submitted_at: r.get::<DateTime<Utc>, _>(7),
    }
}

/// Turns a bare path (or `sqlite:` path) into a `sqlite://` URL; other
/// URLs pass through untouched. An empty string yields `fallback`.
pub fn normalize_database_url(raw_database_url: &str, fallback: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return fallback.to_string();
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

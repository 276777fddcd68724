use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::{
    domain::{SubmissionId, TaskKey, TaskSpec, TestId},
    protocol::TestDraft,
};
use storage::{normalize_database_url, Storage};

const DEFAULT_DATABASE_URL: &str = "sqlite://./data/assessment.db";

/// Catalog and review administration against the assessment database.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = DEFAULT_DATABASE_URL)]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateTest {
        #[arg(long)]
        title: String,
        #[arg(long)]
        duration_minutes: i64,
        /// `KEY=PROMPT`, repeated once per task.
        #[arg(long = "task", required = true)]
        tasks: Vec<String>,
        /// `KEY=URL` attaching an image to a task.
        #[arg(long = "image")]
        images: Vec<String>,
    },
    ListTests,
    ShowTest {
        test_id: i64,
    },
    DeleteTest {
        test_id: i64,
    },
    ListSubmissions,
    ShowSubmission {
        submission_id: i64,
    },
    DeleteSubmission {
        submission_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let database_url = normalize_database_url(&cli.database_url, DEFAULT_DATABASE_URL);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open '{database_url}'"))?;

    match cli.command {
        Command::CreateTest {
            title,
            duration_minutes,
            tasks,
            images,
        } => {
            let draft = TestDraft {
                title,
                duration_minutes,
                tasks: build_tasks(&tasks, &images)?,
            };
            draft.validate()?;
            let test_id = storage.create_test(&draft).await?;
            println!("created test_id={test_id}");
        }
        Command::ListTests => {
            for summary in storage.list_tests().await?.iter().map(|t| t.summary()) {
                println!(
                    "#{:<4} {:<32} {:>3} min  {} task(s)  {}",
                    summary.test_id.0,
                    summary.title,
                    summary.duration_minutes,
                    summary.task_count,
                    summary.preview
                );
            }
        }
        Command::ShowTest { test_id } => {
            let test = storage
                .load_test(TestId(test_id))
                .await?
                .ok_or_else(|| anyhow!("test {test_id} not found"))?
                .into_definition();
            println!("{} ({} minutes)", test.title, test.duration_minutes);
            for task in &test.tasks {
                println!("\n[{}]", task.key.label());
                println!("{}", task.prompt);
                if let Some(url) = &task.image_url {
                    println!("image: {url}");
                }
            }
        }
        Command::DeleteTest { test_id } => {
            if !storage.delete_test(TestId(test_id)).await? {
                bail!("test {test_id} not found");
            }
            println!("deleted test_id={test_id}");
        }
        Command::ListSubmissions => {
            for record in storage.list_submissions().await? {
                println!(
                    "#{:<4} {:<24} {:<32} {:>5} words  {}  {}",
                    record.submission_id.0,
                    record.student_label(),
                    record.test_label(),
                    record.word_count,
                    record.submitted_at.format("%Y-%m-%d %H:%M"),
                    record.kind_label()
                );
            }
        }
        Command::ShowSubmission { submission_id } => {
            let record = storage
                .load_submission(SubmissionId(submission_id))
                .await?
                .ok_or_else(|| anyhow!("submission {submission_id} not found"))?;
            println!(
                "{} / {} / {} words / {} / {}\n",
                record.student_label(),
                record.test_label(),
                record.word_count,
                record.submitted_at.to_rfc3339(),
                record.kind_label()
            );
            println!("{}", record.content);
        }
        Command::DeleteSubmission { submission_id } => {
            if !storage
                .delete_submission(SubmissionId(submission_id))
                .await?
            {
                bail!("submission {submission_id} not found");
            }
            println!("deleted submission_id={submission_id}");
        }
    }

    Ok(())
}

fn split_pair(raw: &str) -> Result<(&str, &str)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{raw}'"))?;
    Ok((key.trim(), value.trim()))
}

/// Builds tasks in the order given on the command line.
fn build_tasks(tasks: &[String], images: &[String]) -> Result<Vec<TaskSpec>> {
    let mut specs = tasks
        .iter()
        .map(|raw| {
            let (key, prompt) = split_pair(raw)?;
            Ok(TaskSpec {
                key: TaskKey::new(key),
                prompt: prompt.to_string(),
                image_url: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    for raw in images {
        let (key, url) = split_pair(raw)?;
        let task = specs
            .iter_mut()
            .find(|task| task.key.as_str() == key)
            .ok_or_else(|| anyhow!("image given for unknown task '{key}'"))?;
        task.image_url = Some(url.to_string());
    }
    Ok(specs)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

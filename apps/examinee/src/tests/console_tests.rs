use super::*;
use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use session_core::{IntervalClock, SessionConfig, SessionDependencies, StorageBackend};
use shared::{
    domain::{TaskSpec, TestId},
    protocol::TestDraft,
};
use storage::Storage;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    sync::Notify,
};

async fn seeded_backend() -> (Arc<StorageBackend>, TestId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let test_id = storage
        .create_test(&TestDraft {
            title: "Academic Writing".to_string(),
            duration_minutes: 1,
            tasks: vec![
                TaskSpec {
                    key: TaskKey::from("task1"),
                    prompt: "Summarise the chart.".to_string(),
                    image_url: None,
                },
                TaskSpec {
                    key: TaskKey::from("task2"),
                    prompt: "Discuss both views.".to_string(),
                    image_url: None,
                },
            ],
        })
        .await
        .expect("test");
    (Arc::new(StorageBackend::new(storage)), test_id)
}

fn deps(backend: &Arc<StorageBackend>, tick: Duration) -> SessionDependencies {
    SessionDependencies {
        catalog: backend.clone(),
        sink: backend.clone(),
        clock: Arc::new(IntervalClock::new(tick)),
        config: SessionConfig::default(),
    }
}

/// Output buffer the test can read while the console is still running.
#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

async fn wait_for_text(output: &SharedOutput, needle: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while output.text().matches(needle).count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("console never printed {needle:?}:\n{}", output.text()));
}

/// Holds its first call until released, then rejects it. Later calls go
/// straight to storage.
struct FailOnceSink {
    inner: Arc<StorageBackend>,
    calls: AtomicUsize,
    entered: Notify,
    release: Notify,
}

impl FailOnceSink {
    fn new(inner: Arc<StorageBackend>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl SubmissionSink for FailOnceSink {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.release.notified().await;
            anyhow::bail!("storage offline");
        }
        self.inner.submit(payload).await
    }
}

#[test]
fn commands_are_recognised_and_text_passes_through() {
    assert_eq!(
        parse_input("The chart shows growth."),
        Input::Text("The chart shows growth.".to_string())
    );
    assert_eq!(
        parse_input(":task task2"),
        Input::SwitchTask(TaskKey::from("task2"))
    );
    assert_eq!(parse_input(":submit"), Input::Submit);
    assert_eq!(parse_input(":status"), Input::Status);
    assert_eq!(parse_input(":clear"), Input::Clear);
    assert_eq!(parse_input(":help"), Input::Help);
    assert_eq!(parse_input("::-)"), Input::Text(":-)".to_string()));
    assert_eq!(
        parse_input(":task"),
        Input::Unknown(":task".to_string())
    );
    assert_eq!(
        parse_input(":submit now"),
        Input::Unknown(":submit now".to_string())
    );
}

#[test]
fn remaining_time_formats_as_minutes_and_seconds() {
    assert_eq!(format_remaining(3600), "60:00");
    assert_eq!(format_remaining(299), "04:59");
    assert_eq!(format_remaining(0), "00:00");
}

#[test]
fn announcements_every_minute_then_every_second() {
    assert!(should_announce(3540));
    assert!(!should_announce(3539));
    assert!(!should_announce(301));
    assert!(should_announce(300));
    assert!(should_announce(17));
}

#[tokio::test]
async fn typed_answers_are_submitted_across_tasks() {
    let (backend, test_id) = seeded_backend().await;
    let deps = deps(&backend, Duration::from_secs(1));
    let session = AssessmentSession::begin(&deps, test_id, "Dilnoza")
        .await
        .expect("session");

    let input: &[u8] =
        b"The chart shows growth.\n:task task2\nI agree.\n:status\n:task task9\n:submit\n";
    let mut console = Console::new(input, Vec::new(), session.definition());
    let receipt = console
        .run(session, deps.sink.clone(), Duration::from_secs(5))
        .await
        .expect("run")
        .expect("submitted");

    let record = backend
        .storage()
        .load_submission(receipt.submission_id)
        .await
        .expect("load")
        .expect("stored");
    assert_eq!(record.word_count, 6);
    assert!(!record.auto_submitted);
    assert_eq!(
        record.content,
        "=== TASK 1 ===\n\nThe chart shows growth.\n\n=== TASK 2 ===\n\nI agree."
    );

    let output = String::from_utf8(console.into_output()).expect("utf8");
    assert!(output.contains("[TASK 2] Discuss both views."));
    assert!(output.contains("total: 6 words"));
    assert!(output.contains("unknown task key 'task9'"));
    assert!(output.contains("Submitted (submission #"));
}

#[tokio::test]
async fn unfinished_work_is_submitted_when_time_runs_out() {
    let (backend, test_id) = seeded_backend().await;
    let deps = deps(&backend, Duration::from_millis(2));
    let session = AssessmentSession::begin(&deps, test_id, "Dilnoza")
        .await
        .expect("session");

    let (reader, mut writer) = tokio::io::duplex(1024);
    writer
        .write_all(b"Half a sentence\n")
        .await
        .expect("write");

    let mut console = Console::new(BufReader::new(reader), Vec::new(), session.definition());
    let receipt = console
        .run(session, deps.sink.clone(), Duration::from_secs(5))
        .await
        .expect("run")
        .expect("submitted");
    drop(writer);

    let record = backend
        .storage()
        .load_submission(receipt.submission_id)
        .await
        .expect("load")
        .expect("stored");
    assert!(record.auto_submitted);
    assert_eq!(record.word_count, 3);

    let output = String::from_utf8(console.into_output()).expect("utf8");
    assert!(output.contains("[00:01 remaining]"));
    assert!(output.contains("Time is up."));
    assert!(output.contains("Submitted automatically"));
}

fn failed_payload(test_id: TestId) -> SubmissionPayload {
    SubmissionPayload {
        test_id,
        display_name: "Dilnoza".to_string(),
        content: "=== TASK 1 ===\n\nrescued words".to_string(),
        word_count: 2,
        auto_submitted: true,
    }
}

#[tokio::test]
async fn resubmission_is_sent_once_when_accepted() {
    let (backend, test_id) = seeded_backend().await;
    let definition = backend
        .storage()
        .load_test(test_id)
        .await
        .expect("load")
        .expect("test")
        .into_definition();

    let input: &[u8] = b"y\n";
    let mut console = Console::new(input, Vec::new(), &definition);
    let receipt = console
        .offer_resubmission(
            &failed_payload(test_id),
            backend.as_ref(),
            Duration::from_secs(5),
        )
        .await
        .expect("offer")
        .expect("resubmitted");

    let records = backend.storage().list_submissions().await.expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].submission_id, receipt.submission_id);
}

#[tokio::test]
async fn declined_resubmission_prints_the_transcript() {
    let (backend, test_id) = seeded_backend().await;
    let definition = backend
        .storage()
        .load_test(test_id)
        .await
        .expect("load")
        .expect("test")
        .into_definition();

    let input: &[u8] = b"n\n";
    let mut console = Console::new(input, Vec::new(), &definition);
    let receipt = console
        .offer_resubmission(
            &failed_payload(test_id),
            backend.as_ref(),
            Duration::from_secs(5),
        )
        .await
        .expect("offer");

    assert!(receipt.is_none());
    assert!(backend
        .storage()
        .list_submissions()
        .await
        .expect("list")
        .is_empty());
    let output = String::from_utf8(console.into_output()).expect("utf8");
    assert!(output.contains("rescued words"));
}

#[tokio::test]
async fn input_ignored_during_a_failed_attempt_is_not_replayed() {
    let (backend, test_id) = seeded_backend().await;
    let sink = Arc::new(FailOnceSink::new(backend.clone()));
    let deps = SessionDependencies {
        catalog: backend.clone(),
        sink: sink.clone(),
        clock: Arc::new(IntervalClock::new(Duration::from_secs(1))),
        config: SessionConfig::default(),
    };
    let session = AssessmentSession::begin(&deps, test_id, "Dilnoza")
        .await
        .expect("session");

    let (reader, mut writer) = tokio::io::duplex(1024);
    let output = SharedOutput::default();
    let mut console = Console::new(BufReader::new(reader), output.clone(), session.definition());

    let run = console.run(session, deps.sink.clone(), Duration::from_secs(5));
    let script = async {
        writer
            .write_all(b"kept words\n:submit\n")
            .await
            .expect("write");
        sink.entered.notified().await;
        writer
            .write_all(b":clear\ntyped while submitting\n")
            .await
            .expect("write");
        wait_for_text(&output, "input ignored", 2).await;

        sink.release.notify_one();
        wait_for_text(&output, "Use :submit to try again", 1).await;
        writer
            .write_all(b"after retry\n:submit\n")
            .await
            .expect("write");
    };
    let (receipt, ()) = tokio::join!(run, script);
    let receipt = receipt.expect("run").expect("submitted");

    let record = backend
        .storage()
        .load_submission(receipt.submission_id)
        .await
        .expect("load")
        .expect("stored");
    assert_eq!(
        record.content,
        "=== TASK 1 ===\n\nkept words\nafter retry\n\n=== TASK 2 ===\n\n"
    );
    assert_eq!(record.word_count, 4);
    assert!(!record.auto_submitted);
}

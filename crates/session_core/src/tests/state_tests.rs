use super::*;
use shared::domain::TaskSpec;

fn definition(keys: &[&str], duration_minutes: i64) -> TestDefinition {
    TestDefinition {
        id: TestId(7),
        title: "Academic Writing".to_string(),
        duration_minutes,
        tasks: keys
            .iter()
            .map(|key| TaskSpec {
                key: TaskKey::from(*key),
                prompt: format!("prompt for {key}"),
                image_url: None,
            })
            .collect(),
    }
}

fn two_task_state() -> SessionState {
    SessionState::new(&definition(&["task1", "task2"], 60), "Dilnoza").expect("state")
}

fn key(raw: &str) -> TaskKey {
    TaskKey::from(raw)
}

#[test]
fn starts_drafting_on_first_task_with_full_time() {
    let state = two_task_state();
    assert_eq!(state.status(), SubmissionStatus::Drafting);
    assert_eq!(state.active_task(), &key("task1"));
    assert_eq!(state.remaining_seconds(), 3600);
    assert_eq!(state.total_seconds(), 3600);
    assert!(state.termination_cause().is_none());
    assert_eq!(state.task_keys(), &[key("task1"), key("task2")]);
}

#[test]
fn rejects_non_positive_duration() {
    for minutes in [0, -5] {
        let err = SessionState::new(&definition(&["task1"], minutes), "Dilnoza")
            .expect_err("invalid duration");
        assert_eq!(
            err,
            SessionError::InvalidDuration {
                test_id: TestId(7),
                minutes
            }
        );
    }
}

#[test]
fn rejects_blank_display_name() {
    let err = SessionState::new(&definition(&["task1"], 10), "   ").expect_err("blank name");
    assert_eq!(err, SessionError::InvalidDisplayName);
}

#[test]
fn rejects_tests_without_tasks_or_with_duplicate_keys() {
    let err = SessionState::new(&definition(&[], 10), "Dilnoza").expect_err("no tasks");
    assert_eq!(err.kind(), ErrorKind::MalformedTest);

    let err = SessionState::new(&definition(&["task1", "task1"], 10), "Dilnoza")
        .expect_err("duplicate keys");
    assert_eq!(err.kind(), ErrorKind::MalformedTest);
}

#[test]
fn edits_update_only_the_named_buffer() {
    let mut state = two_task_state();
    assert_eq!(
        state.edit_content(&key("task2"), "  a  bb   ").expect("edit"),
        Transition::Applied
    );

    assert_eq!(state.buffer(&key("task2")).expect("buffer").word_count(), 2);
    assert_eq!(state.buffer(&key("task1")).expect("buffer").word_count(), 0);
    assert_eq!(state.total_word_count(), 2);
}

#[test]
fn unknown_task_key_is_reported_and_changes_nothing() {
    let mut state = two_task_state();
    state.edit_content(&key("task1"), "kept").expect("edit");

    let err = state
        .edit_content(&key("task3"), "lost")
        .expect_err("unknown key");
    assert_eq!(err, SessionError::InvalidTaskKey(key("task3")));
    let err = state
        .set_active_task(&key("task3"))
        .expect_err("unknown key");
    assert_eq!(err.kind(), ErrorKind::InvalidTaskKey);

    assert_eq!(state.active_task(), &key("task1"));
    assert_eq!(state.buffer(&key("task1")).expect("buffer").content(), "kept");
    assert_eq!(state.status(), SubmissionStatus::Drafting);
    assert_eq!(state.snapshot().last_error, Some(ErrorKind::InvalidTaskKey));
}

#[test]
fn task_key_error_clears_after_next_accepted_intent() {
    let mut state = two_task_state();
    state
        .set_active_task(&key("task9"))
        .expect_err("unknown key");
    assert_eq!(state.snapshot().last_error, Some(ErrorKind::InvalidTaskKey));

    state.set_active_task(&key("task2")).expect("navigate");
    assert!(state.snapshot().last_error.is_none());

    state
        .edit_content(&key("task9"), "lost")
        .expect_err("unknown key");
    state.edit_content(&key("task2"), "found").expect("edit");
    assert!(state.snapshot().last_error.is_none());
}

#[test]
fn edits_after_a_failed_attempt_keep_the_failure_visible() {
    let mut state = two_task_state();
    state.request_submit();
    state.record_submission_failure();

    state.edit_content(&key("task1"), "more words").expect("edit");
    assert_eq!(state.snapshot().last_error, Some(ErrorKind::SubmissionFailed));
}

#[test]
fn switching_tasks_never_touches_content() {
    let mut state = two_task_state();
    state.edit_content(&key("task1"), "first draft").expect("edit");
    state.set_active_task(&key("task2")).expect("navigate");
    state.set_active_task(&key("task1")).expect("navigate back");

    assert_eq!(state.active_task(), &key("task1"));
    assert_eq!(
        state.buffer(&key("task1")).expect("buffer").content(),
        "first draft"
    );
}

#[test]
fn remaining_time_never_increases() {
    let mut state = two_task_state();
    state.tick(3000);
    state.tick(3500);
    assert_eq!(state.remaining_seconds(), 3000);
}

#[test]
fn expiry_tick_starts_auto_submission() {
    let mut state = two_task_state();
    state
        .edit_content(&key("task1"), "The chart shows growth.")
        .expect("edit");

    let Transition::BeginSubmission(payload) = state.tick(0) else {
        panic!("expected submission to begin");
    };
    assert!(payload.auto_submitted);
    assert_eq!(payload.word_count, 4);
    assert_eq!(state.status(), SubmissionStatus::Submitting);
    assert_eq!(
        state.termination_cause(),
        Some(TerminationCause::TimeExpired)
    );
}

#[test]
fn manual_submit_then_expiry_records_one_cause() {
    let mut state = two_task_state();
    assert!(matches!(
        state.request_submit(),
        Transition::BeginSubmission(_)
    ));
    assert_eq!(state.tick(0), Transition::Applied);
    assert_eq!(state.expire(), Transition::Applied);

    assert_eq!(state.termination_cause(), Some(TerminationCause::Manual));
    assert_eq!(state.status(), SubmissionStatus::Submitting);
    assert_eq!(state.attempts, 1);
}

#[test]
fn expiry_then_manual_submit_records_one_cause() {
    let mut state = two_task_state();
    assert!(matches!(state.tick(0), Transition::BeginSubmission(_)));
    assert_eq!(state.request_submit(), Transition::Dropped);

    assert_eq!(
        state.termination_cause(),
        Some(TerminationCause::TimeExpired)
    );
    assert_eq!(state.attempts, 1);
}

#[test]
fn intents_after_termination_are_dropped_without_side_effects() {
    let mut state = two_task_state();
    state.edit_content(&key("task1"), "draft").expect("edit");
    state.tick(1200);
    state.request_submit();
    let before = state.snapshot();

    assert_eq!(
        state.edit_content(&key("task1"), "changed").expect("edit"),
        Transition::Dropped
    );
    assert_eq!(
        state.set_active_task(&key("task2")).expect("navigate"),
        Transition::Dropped
    );
    assert_eq!(
        state.edit_content(&key("missing"), "x").expect("dropped first"),
        Transition::Dropped
    );
    assert_eq!(state.request_submit(), Transition::Dropped);

    assert_eq!(state.snapshot(), before);
    assert_eq!(state.buffer(&key("task1")).expect("buffer").content(), "draft");
}

#[test]
fn transcript_labels_sections_in_task_order() {
    let mut state = two_task_state();
    state
        .edit_content(&key("task2"), "I agree.")
        .expect("edit");
    state
        .edit_content(&key("task1"), "The chart shows growth.")
        .expect("edit");

    let Transition::BeginSubmission(payload) = state.request_submit() else {
        panic!("expected submission to begin");
    };
    assert_eq!(
        payload.content,
        "=== TASK 1 ===\n\nThe chart shows growth.\n\n=== TASK 2 ===\n\nI agree."
    );
    assert_eq!(payload.word_count, 6);
    assert_eq!(payload.display_name, "Dilnoza");
    assert_eq!(payload.test_id, TestId(7));
    assert!(!payload.auto_submitted);
}

#[test]
fn single_task_transcript_has_one_section() {
    let mut state =
        SessionState::new(&definition(&["task1"], 20), "  Otabek  ").expect("state");
    state.edit_content(&key("task1"), "Hello there").expect("edit");

    let payload = state.payload();
    assert_eq!(payload.content, "=== TASK 1 ===\n\nHello there");
    assert_eq!(payload.display_name, "Otabek");
}

#[test]
fn failed_manual_submission_returns_to_drafting_with_content() {
    let mut state = two_task_state();
    state.edit_content(&key("task1"), "keep me").expect("edit");
    state.request_submit();

    assert_eq!(state.record_submission_failure(), Transition::Applied);
    assert_eq!(state.status(), SubmissionStatus::Drafting);
    assert!(state.termination_cause().is_none());
    assert_eq!(state.buffer(&key("task1")).expect("buffer").content(), "keep me");
    assert_eq!(state.snapshot().last_error, Some(ErrorKind::SubmissionFailed));

    state.edit_content(&key("task1"), "keep me, edited").expect("edit again");
    assert!(matches!(
        state.request_submit(),
        Transition::BeginSubmission(_)
    ));
    assert_eq!(state.attempts, 2);
    assert!(state.snapshot().last_error.is_none());
}

#[test]
fn failed_expiry_submission_is_terminal() {
    let mut state = two_task_state();
    state.tick(0);

    assert_eq!(state.record_submission_failure(), Transition::Applied);
    assert_eq!(state.status(), SubmissionStatus::Failed);
    assert!(state.is_terminal());

    assert_eq!(state.request_submit(), Transition::Dropped);
    assert_eq!(
        state.edit_content(&key("task1"), "late").expect("edit"),
        Transition::Dropped
    );
    assert_eq!(state.tick(0), Transition::Dropped);
    assert_eq!(state.status(), SubmissionStatus::Failed);
}

#[test]
fn manual_failure_after_time_ran_out_becomes_auto_submission() {
    let mut state = two_task_state();
    state.edit_content(&key("task1"), "almost done").expect("edit");
    state.request_submit();
    state.tick(0);

    let Transition::BeginSubmission(payload) = state.record_submission_failure() else {
        panic!("expected automatic resubmission");
    };
    assert!(payload.auto_submitted);
    assert_eq!(
        state.termination_cause(),
        Some(TerminationCause::TimeExpired)
    );
    assert_eq!(state.status(), SubmissionStatus::Submitting);
}

#[test]
fn success_is_terminal_and_outcomes_outside_submitting_are_dropped() {
    let mut state = two_task_state();
    assert_eq!(state.record_submission_success(), Transition::Dropped);
    assert_eq!(state.record_submission_failure(), Transition::Dropped);

    state.request_submit();
    assert_eq!(state.record_submission_success(), Transition::Applied);
    assert_eq!(state.status(), SubmissionStatus::Submitted);
    assert_eq!(state.record_submission_failure(), Transition::Dropped);
    assert_eq!(state.status(), SubmissionStatus::Submitted);
}

#[test]
fn snapshot_reports_per_task_word_counts() {
    let mut state = two_task_state();
    state.edit_content(&key("task1"), "one two").expect("edit");
    state.edit_content(&key("task2"), "three").expect("edit");
    state.set_active_task(&key("task2")).expect("navigate");
    state.tick(3599);

    let snapshot = state.snapshot();
    assert_eq!(snapshot.remaining_seconds, 3599);
    assert_eq!(snapshot.active_task, key("task2"));
    assert_eq!(
        snapshot.tasks,
        vec![
            TaskProgress {
                key: key("task1"),
                word_count: 2
            },
            TaskProgress {
                key: key("task2"),
                word_count: 1
            },
        ]
    );
    assert_eq!(snapshot.total_word_count, 3);
    assert_eq!(snapshot.status, SubmissionStatus::Drafting);
}

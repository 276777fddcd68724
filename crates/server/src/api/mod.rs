use shared::{
    domain::{SubmissionId, TestDefinition, TestId},
    error::{ApiError, ErrorCode},
    protocol::{SubmissionPayload, SubmissionReceipt, SubmissionRecord, TestDraft, TestSummary},
};
use storage::Storage;
use tracing::info;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub fn validate_draft(draft: &TestDraft) -> Result<(), ApiError> {
    draft.validate().map_err(ApiError::from)
}

pub async fn list_tests(ctx: &ApiContext) -> Result<Vec<TestSummary>, ApiError> {
    let tests = ctx.storage.list_tests().await.map_err(internal)?;
    Ok(tests.iter().map(|test| test.summary()).collect())
}

pub async fn get_test(ctx: &ApiContext, test_id: TestId) -> Result<TestDefinition, ApiError> {
    ctx.storage
        .load_test(test_id)
        .await
        .map_err(internal)?
        .map(|test| test.into_definition())
        .ok_or_else(|| test_not_found(test_id))
}

pub async fn create_test(ctx: &ApiContext, draft: &TestDraft) -> Result<TestId, ApiError> {
    validate_draft(draft)?;
    let test_id = ctx.storage.create_test(draft).await.map_err(internal)?;
    info!(test_id = test_id.0, tasks = draft.tasks.len(), "catalog: test created");
    Ok(test_id)
}

pub async fn update_test(
    ctx: &ApiContext,
    test_id: TestId,
    draft: &TestDraft,
) -> Result<(), ApiError> {
    validate_draft(draft)?;
    if !ctx
        .storage
        .update_test(test_id, draft)
        .await
        .map_err(internal)?
    {
        return Err(test_not_found(test_id));
    }
    info!(test_id = test_id.0, tasks = draft.tasks.len(), "catalog: test updated");
    Ok(())
}

pub async fn delete_test(ctx: &ApiContext, test_id: TestId) -> Result<(), ApiError> {
    if !ctx.storage.delete_test(test_id).await.map_err(internal)? {
        return Err(test_not_found(test_id));
    }
    info!(test_id = test_id.0, "catalog: test deleted");
    Ok(())
}

pub async fn record_submission(
    ctx: &ApiContext,
    payload: &SubmissionPayload,
) -> Result<SubmissionReceipt, ApiError> {
    if payload.content.trim().is_empty() {
        return Err(validation("submission content must not be empty"));
    }
    let receipt = ctx
        .storage
        .insert_submission(payload)
        .await
        .map_err(internal)?;
    info!(
        submission_id = receipt.submission_id.0,
        test_id = payload.test_id.0,
        word_count = payload.word_count,
        auto_submitted = payload.auto_submitted,
        "review: submission recorded"
    );
    Ok(receipt)
}

pub async fn list_submissions(ctx: &ApiContext) -> Result<Vec<SubmissionRecord>, ApiError> {
    ctx.storage.list_submissions().await.map_err(internal)
}

pub async fn delete_submission(
    ctx: &ApiContext,
    submission_id: SubmissionId,
) -> Result<(), ApiError> {
    if !ctx
        .storage
        .delete_submission(submission_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::new(
            ErrorCode::NotFound,
            format!("submission {submission_id} not found"),
        ));
    }
    info!(submission_id = submission_id.0, "review: submission deleted");
    Ok(())
}

fn test_not_found(test_id: TestId) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("test {test_id} not found"))
}

fn validation(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::Validation, message)
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, format!("{err:#}"))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;

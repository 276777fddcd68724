use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use shared::{
    domain::{SubmissionId, TestDefinition, TestId},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateTestResponse, SubmissionPayload, SubmissionReceipt, SubmissionRecord, TestDraft,
        TestSummary,
    },
};
use storage::Storage;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::ApiContext;
use app_state::AppState;
use config::{load_settings, prepare_database_url};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "assessment server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tests", get(http_list_tests).post(http_create_test))
        .route(
            "/tests/:test_id",
            get(http_get_test)
                .put(http_update_test)
                .delete(http_delete_test),
        )
        .route(
            "/submissions",
            post(http_submit).get(http_list_submissions),
        )
        .route("/submissions/:submission_id", delete(http_delete_submission))
        .with_state(state)
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state.api.storage.health_check().await.map_err(|e| {
        reject(ApiError::new(ErrorCode::Internal, e.to_string()))
    })?;
    Ok("ok")
}

async fn http_list_tests(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TestSummary>>> {
    let tests = api::list_tests(&state.api).await.map_err(reject)?;
    Ok(Json(tests))
}

async fn http_get_test(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<i64>,
) -> ApiResult<Json<TestDefinition>> {
    let test = api::get_test(&state.api, TestId(test_id))
        .await
        .map_err(reject)?;
    Ok(Json(test))
}

async fn http_create_test(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<TestDraft>,
) -> ApiResult<(StatusCode, Json<CreateTestResponse>)> {
    let test_id = api::create_test(&state.api, &draft)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(CreateTestResponse { test_id })))
}

async fn http_update_test(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<i64>,
    Json(draft): Json<TestDraft>,
) -> ApiResult<StatusCode> {
    api::update_test(&state.api, TestId(test_id), &draft)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_delete_test(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<i64>,
) -> ApiResult<StatusCode> {
    api::delete_test(&state.api, TestId(test_id))
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmissionPayload>,
) -> ApiResult<Json<SubmissionReceipt>> {
    let receipt = api::record_submission(&state.api, &payload)
        .await
        .map_err(reject)?;
    Ok(Json(receipt))
}

async fn http_list_submissions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<SubmissionRecord>>> {
    let submissions = api::list_submissions(&state.api).await.map_err(reject)?;
    Ok(Json(submissions))
}

async fn http_delete_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<i64>,
) -> ApiResult<StatusCode> {
    api::delete_submission(&state.api, SubmissionId(submission_id))
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

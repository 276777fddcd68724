use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::{TestDefinition, TestId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{SubmissionPayload, SubmissionReceipt},
};

use crate::{CatalogReader, SubmissionSink};

/// Talks to the assessment server over its JSON API.
#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    server_url: String,
}

impl HttpBackend {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: impl Into<String>) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self { http, server_url }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Turns a non-success response into an [`ApiException`], falling back to
/// the raw body when the server did not answer with an [`ApiError`].
async fn api_failure(res: Response) -> anyhow::Error {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api) => ApiException::from(api).into(),
        Err(_) => {
            let code = if status == StatusCode::NOT_FOUND {
                ErrorCode::NotFound
            } else if status.is_client_error() {
                ErrorCode::Validation
            } else {
                ErrorCode::Internal
            };
            ApiException::new(code, format!("server answered {status}: {body}")).into()
        }
    }
}

#[async_trait]
impl CatalogReader for HttpBackend {
    async fn fetch_test(&self, test_id: TestId) -> Result<Option<TestDefinition>> {
        let res = self
            .http
            .get(format!("{}/tests/{}", self.server_url, test_id))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.server_url))?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(api_failure(res).await);
        }
        let definition = res
            .json()
            .await
            .context("test definition response was not valid JSON")?;
        Ok(Some(definition))
    }
}

#[async_trait]
impl SubmissionSink for HttpBackend {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt> {
        let res = self
            .http
            .post(format!("{}/submissions", self.server_url))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.server_url))?;
        if !res.status().is_success() {
            return Err(api_failure(res).await);
        }
        res.json()
            .await
            .context("submission receipt was not valid JSON")
    }
}

#[cfg(test)]
#[path = "tests/http_client_tests.rs"]
mod tests;

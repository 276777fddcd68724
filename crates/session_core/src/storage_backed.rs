use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{TestDefinition, TestId},
    protocol::{SubmissionPayload, SubmissionReceipt},
};
use storage::Storage;
use tracing::debug;

use crate::{CatalogReader, SubmissionSink};

/// Serves the catalog and records submissions straight from a local
/// database, for single-machine deployments without a server.
#[derive(Clone)]
pub struct StorageBackend {
    storage: Storage,
}

impl StorageBackend {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn initialize(database_url: &str) -> Result<Arc<Self>> {
        let storage = Storage::new(database_url)
            .await
            .with_context(|| format!("failed to open assessment database at '{database_url}'"))?;
        Ok(Arc::new(Self::new(storage)))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[async_trait]
impl CatalogReader for StorageBackend {
    async fn fetch_test(&self, test_id: TestId) -> Result<Option<TestDefinition>> {
        let stored = self
            .storage
            .load_test(test_id)
            .await
            .with_context(|| format!("failed to load test {test_id}"))?;
        Ok(stored.map(|test| test.into_definition()))
    }
}

#[async_trait]
impl SubmissionSink for StorageBackend {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<SubmissionReceipt> {
        let receipt = self
            .storage
            .insert_submission(payload)
            .await
            .context("failed to store submission")?;
        debug!(
            submission_id = receipt.submission_id.0,
            test_id = payload.test_id.0,
            "storage: submission recorded"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
#[path = "tests/storage_backed_tests.rs"]
mod tests;

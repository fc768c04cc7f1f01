//! Payload retrieval seam of the workflow.

use std::future::Future;

use bytes::Bytes;
use job_manager_client::{FetchError, JobManagerClient};

use crate::failure::{Classify, FailureKind};

/// Retrieves the payload of a job.
pub trait FetchData: Send + Sync {
    type Error: std::error::Error + Classify + Send + Sync + 'static;

    fn fetch(
        &self,
        filepath: &str,
        correlation_id: &str,
        credential: &str,
    ) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;

    /// Releases the connection. Called once on service shutdown.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

impl FetchData for JobManagerClient {
    type Error = FetchError;

    async fn fetch(
        &self,
        filepath: &str,
        correlation_id: &str,
        credential: &str,
    ) -> Result<Bytes, FetchError> {
        JobManagerClient::fetch(self, filepath, correlation_id, credential).await
    }

    async fn close(&self) {
        JobManagerClient::close(self);
    }
}

impl Classify for FetchError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::Call { .. } | FetchError::NotConnected => FailureKind::Transport,
            FetchError::InvalidMetadata { .. } => FailureKind::MalformedInput,
        }
    }
}

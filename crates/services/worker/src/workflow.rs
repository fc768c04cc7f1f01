//! Per-job processing: validate, fetch, extract, publish, settle.

use std::sync::Arc;

use amqp_client::{AckError, Acknowledge, JobEnvelope, MessageHeaders, OutgoingJob};
use bytes::Bytes;
use monitoring::logging;
use serde_json::Value;

use crate::{
    extract::Extract,
    failure::{Classify as _, FailureKind, JobFailure, error_chain},
    fetch::FetchData,
    publish::Publish,
};

/// Reason published when a job arrives without correlation id or credential.
pub const MISSING_CREDENTIALS_REASON: &str = "bad request, no credentials provided";

/// Reason published when a job carries an empty `filepath`.
pub const MISSING_FILEPATH_REASON: &str = "bad request, no filepath provided";

/// Terminal state of a handled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The result was published and the message acknowledged
    Acked,
    /// A failure envelope was published and the message rejected
    Rejected { requeue: bool },
}

/// Intermediate states, for logging.
#[derive(Debug, Clone, Copy)]
enum JobState {
    Received,
    HeadersValidated,
    DataFetched,
    Extracted,
    Published,
}

/// Drives jobs through fetch, extraction and publishing.
pub struct Workflow<F, X, P> {
    fetcher: F,
    extractor: Arc<X>,
    publisher: P,
    reply_queue: String,
}

impl<F, X, P> Workflow<F, X, P>
where
    F: FetchData,
    X: Extract,
    P: Publish,
{
    /// Creates a workflow publishing every outcome to `reply_queue`.
    pub fn new(fetcher: F, extractor: X, publisher: P, reply_queue: impl Into<String>) -> Self {
        Self {
            fetcher,
            extractor: Arc::new(extractor),
            publisher,
            reply_queue: reply_queue.into(),
        }
    }

    /// Handles one job and settles its message.
    ///
    /// On success the result is published before the message is acked. On failure a failure
    /// envelope is published, then the message is nacked and requeued when the failure is
    /// retryable. A failure to publish the failure envelope is logged and does not prevent the
    /// nack.
    pub async fn handle_job<M: Acknowledge>(
        &self,
        job: JobEnvelope<Value>,
        message: M,
    ) -> Result<JobOutcome, AckError> {
        let headers = message.headers();
        let corr_id = headers.correlation_id.as_deref().unwrap_or_default();
        tracing::info!(
            job_id = %job.job_id,
            corr_id,
            filepath = %job.filepath,
            from = %job.from,
            state = ?JobState::Received,
            "handling job"
        );

        let Some((correlation_id, credential)) = headers.require() else {
            let failure =
                JobFailure::new(FailureKind::MissingCredentials, MISSING_CREDENTIALS_REASON);
            return self.reject(&job, &message, failure).await;
        };
        if job.filepath.is_empty() {
            let failure = JobFailure::new(FailureKind::MalformedInput, MISSING_FILEPATH_REASON);
            return self.reject(&job, &message, failure).await;
        }
        tracing::debug!(
            job_id = %job.job_id,
            corr_id,
            state = ?JobState::HeadersValidated,
            "job state changed"
        );

        let output = match self.process(&job, correlation_id, credential).await {
            Ok(output) => output,
            Err(failure) => return self.reject(&job, &message, failure).await,
        };

        let result = OutgoingJob::success(
            job.job_id.clone(),
            job.filepath.clone(),
            job.md5.clone(),
            output,
        );
        if let Err(err) = self
            .publisher
            .publish(&self.reply_queue, result, headers)
            .await
        {
            let failure = JobFailure::new(
                FailureKind::Publish,
                format!("failed to publish result: {}", error_chain(&err)),
            );
            return self.reject(&job, &message, failure).await;
        }
        tracing::debug!(
            job_id = %job.job_id,
            corr_id,
            state = ?JobState::Published,
            "job state changed"
        );

        message.ack().await?;
        tracing::info!(
            job_id = %job.job_id,
            corr_id,
            filepath = %job.filepath,
            "job completed"
        );
        Ok(JobOutcome::Acked)
    }

    async fn process(
        &self,
        job: &JobEnvelope<Value>,
        correlation_id: &str,
        credential: &str,
    ) -> Result<X::Output, JobFailure> {
        let payload = self
            .fetcher
            .fetch(&job.filepath, correlation_id, credential)
            .await
            .map_err(|err| JobFailure::from_error(&err))?;
        tracing::debug!(
            job_id = %job.job_id,
            corr_id = correlation_id,
            bytes = payload.len(),
            state = ?JobState::DataFetched,
            "job state changed"
        );

        let output = self.extract(payload).await?;
        tracing::debug!(
            job_id = %job.job_id,
            corr_id = correlation_id,
            state = ?JobState::Extracted,
            "job state changed"
        );

        Ok(output)
    }

    async fn extract(&self, payload: Bytes) -> Result<X::Output, JobFailure> {
        let extractor = self.extractor.clone();
        let description = extractor.description().to_string();

        match tokio::task::spawn_blocking(move || extractor.extract(&payload)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(JobFailure::new(
                err.failure_kind(),
                err.reason(&description),
            )),
            Err(err) => Err(JobFailure::new(
                FailureKind::Unclassified,
                format!("Unexpected error in {description}: {}", join_error_message(err)),
            )),
        }
    }

    async fn reject<M: Acknowledge>(
        &self,
        job: &JobEnvelope<Value>,
        message: &M,
        failure: JobFailure,
    ) -> Result<JobOutcome, AckError> {
        let headers: &MessageHeaders = message.headers();
        let requeue = failure.kind.requeue();
        tracing::warn!(
            job_id = %job.job_id,
            corr_id = headers.correlation_id.as_deref().unwrap_or_default(),
            filepath = %job.filepath,
            kind = ?failure.kind,
            requeue,
            reason = %failure.reason,
            "rejecting job"
        );

        let envelope = OutgoingJob::<X::Output>::failure(
            job.job_id.clone(),
            job.filepath.clone(),
            job.md5.clone(),
            failure.reason,
        );
        if let Err(err) = self
            .publisher
            .publish(&self.reply_queue, envelope, headers)
            .await
        {
            tracing::error!(
                job_id = %job.job_id,
                queue = %self.reply_queue,
                error = %err,
                error_source = logging::error_source(&err),
                "failed to publish failure envelope"
            );
        }

        message.nack(requeue).await?;
        Ok(JobOutcome::Rejected { requeue })
    }

    /// Consumes the workflow, returning the fetcher and the publisher.
    pub fn into_parts(self) -> (F, P) {
        (self.fetcher, self.publisher)
    }
}

fn join_error_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let panic = err.into_panic();
    panic
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "extraction panicked".to_string())
}

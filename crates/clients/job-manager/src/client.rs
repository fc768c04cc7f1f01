use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use backon::{ConstantBuilder, Retryable as _};
use bytes::{Bytes, BytesMut};
use jobflow_config::GrpcConfig;
use monitoring::logging;
use parking_lot::RwLock;
use tonic::{
    metadata::{Ascii, MetadataValue},
    transport::{Channel, Endpoint},
};

use crate::{
    error::{AttemptError, ConnectError, FetchError},
    proto::jobmanager::{GetDataRequest, job_manager_controller_client::JobManagerControllerClient},
};

/// Metadata key carrying the request correlation id.
pub const CORRELATION_ID_KEY: &str = "x-correlation-id";

/// Metadata key carrying the bearer credential.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// Long-lived channel to the job manager.
///
/// The client is an owned value shared by reference between concurrent jobs; the underlying
/// tonic channel multiplexes their calls.
pub struct JobManagerClient {
    url: String,
    endpoint: Endpoint,
    max_attempts: u32,
    retry_delay: Duration,
    attempt_timeout: Duration,
    channel: RwLock<Option<Channel>>,
    attempts: AtomicU32,
}

impl JobManagerClient {
    /// Configures the client. Does not connect.
    pub fn new(config: &GrpcConfig) -> Result<Self, ConnectError> {
        let endpoint = Endpoint::from_shared(config.job_manager_url.clone())
            .map_err(|source| ConnectError::InvalidUrl {
                url: config.job_manager_url.clone(),
                source,
            })?
            .connect_timeout(config.connection_timeout.into());

        Ok(Self {
            url: config.job_manager_url.clone(),
            endpoint,
            max_attempts: config.max_connection_attempts.max(1),
            retry_delay: config.connection_retry_delay.into(),
            attempt_timeout: config.connection_timeout.into(),
            channel: RwLock::new(None),
            attempts: AtomicU32::new(0),
        })
    }

    /// Establishes the channel, retrying with a fixed delay.
    ///
    /// Each attempt is bounded by the configured connection timeout. Fails with
    /// [`ConnectError::RetriesExhausted`] once the configured number of attempts has been made. A successful connection resets the attempt counter.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.attempts.store(0, Ordering::SeqCst);

        let channel = (|| async move {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(url = %self.url, attempt, "connecting to job manager");
            match tokio::time::timeout(self.attempt_timeout, self.endpoint.connect()).await {
                Ok(result) => result.map_err(AttemptError::Transport),
                Err(_) => Err(AttemptError::Timeout(self.attempt_timeout)),
            }
        })
        .retry(
            ConstantBuilder::default()
                .with_delay(self.retry_delay)
                .with_max_times(self.max_attempts as usize - 1),
        )
        .notify(|err, dur| {
            tracing::warn!(
                url = %self.url,
                attempt = self.connection_attempts(),
                max_attempts = self.max_attempts,
                error = %err,
                error_source = logging::error_source(&err),
                "Job manager connection failed. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        })
        .await
        .map_err(|source| ConnectError::RetriesExhausted {
            url: self.url.clone(),
            attempts: self.connection_attempts(),
            source,
        })?;

        self.attempts.store(0, Ordering::SeqCst);
        *self.channel.write() = Some(channel);
        tracing::info!(url = %self.url, "connected to job manager");

        Ok(())
    }

    /// Fetches the content stored at `filepath`.
    ///
    /// The correlation id and `Bearer` credential are sent as request metadata. Chunks are
    /// concatenated in arrival order. The call itself is not retried.
    pub async fn fetch(
        &self,
        filepath: &str,
        correlation_id: &str,
        credential: &str,
    ) -> Result<Bytes, FetchError> {
        let channel = self.channel.read().clone().ok_or(FetchError::NotConnected)?;

        let mut request = tonic::Request::new(GetDataRequest {
            filepath: filepath.to_string(),
        });
        let metadata = request.metadata_mut();
        metadata.insert(CORRELATION_ID_KEY, metadata_value(CORRELATION_ID_KEY, correlation_id)?);
        metadata.insert(
            AUTHORIZATION_KEY,
            metadata_value(AUTHORIZATION_KEY, &format!("Bearer {credential}"))?,
        );

        let call_error = |source| FetchError::Call {
            filepath: filepath.to_string(),
            source,
        };
        let mut client = JobManagerControllerClient::new(channel);
        let mut stream = client
            .get_data(request)
            .await
            .map_err(call_error)?
            .into_inner();

        let mut data = BytesMut::new();
        let mut chunks = 0usize;
        while let Some(chunk) = stream.message().await.map_err(call_error)? {
            data.extend_from_slice(&chunk.data);
            chunks += 1;
        }

        tracing::debug!(
            filepath = %filepath,
            corr_id = %correlation_id,
            chunks,
            bytes = data.len(),
            "payload fetched"
        );
        Ok(data.freeze())
    }

    /// Drops the channel. Calls in flight keep their own handle and complete.
    pub fn close(&self) {
        if self.channel.write().take().is_some() {
            tracing::info!(url = %self.url, "job manager channel closed");
        }
        self.attempts.store(0, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.channel.read().is_some()
    }

    /// Attempts made by the current or last failed `connect`.
    pub fn connection_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn metadata_value(key: &'static str, value: &str) -> Result<MetadataValue<Ascii>, FetchError> {
    value
        .parse::<MetadataValue<Ascii>>()
        .map_err(|source| FetchError::InvalidMetadata { key, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_url() {
        let config = GrpcConfig {
            job_manager_url: "not a url".to_string(),
            ..Default::default()
        };

        let result = JobManagerClient::new(&config);

        assert!(matches!(result, Err(ConnectError::InvalidUrl { .. })));
    }

    #[test]
    fn metadata_value_rejects_control_characters() {
        let result = metadata_value(AUTHORIZATION_KEY, "Bearer token\n");

        let err = result.expect_err("newline is not valid metadata");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn fetch_before_connect_is_retryable() {
        let client = JobManagerClient::new(&GrpcConfig::default()).expect("default URL is valid");

        let result = client.fetch("a.jpg", "corr-1", "token-1").await;

        let err = result.expect_err("client is not connected");
        assert!(matches!(err, FetchError::NotConnected));
        assert!(err.is_retryable());
    }
}

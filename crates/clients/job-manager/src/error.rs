use std::time::Duration;

use tonic::metadata::errors::InvalidMetadataValue;

/// Errors that occur when connecting to the job manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The configured URL is not a valid endpoint
    #[error("invalid job manager URL '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// Every allowed connection attempt failed. This error is fatal.
    #[error("failed to connect to job manager at {url} after {attempts} attempts")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: AttemptError,
    },
}

/// Failure of a single connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// The transport could not be established
    #[error("failed to open channel")]
    Transport(#[source] tonic::transport::Error),

    /// The attempt did not complete in time
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that occur when fetching a payload.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// `fetch` was called before `connect` or after `close`
    #[error("job manager client is not connected")]
    NotConnected,

    /// A request metadata value contains characters not allowed in gRPC metadata
    #[error("invalid '{key}' metadata value")]
    InvalidMetadata {
        key: &'static str,
        #[source]
        source: InvalidMetadataValue,
    },

    /// The `getData` call or its response stream failed
    #[error("failed to stream data for {filepath}")]
    Call {
        filepath: String,
        #[source]
        source: tonic::Status,
    },
}

impl FetchError {
    /// Returns true if the error is retryable.
    ///
    /// Retryable errors are transient failures that may succeed on redelivery:
    /// - `NotConnected`: the channel may be available later
    /// - `Call`: network or server-side failure during the call
    ///
    /// `InvalidMetadata` is permanent: the same job carries the same metadata.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected => true,
            Self::Call { .. } => true,
            Self::InvalidMetadata { .. } => false,
        }
    }
}

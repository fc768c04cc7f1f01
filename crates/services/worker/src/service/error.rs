//! Error types of the worker service phases.

use amqp_client::{ConsumeError, SendError};

/// Errors that can occur during worker initialization (Phase 1).
///
/// All initialization errors are fatal and prevent the worker from starting.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The job manager client could not be configured or connected.
    ///
    /// Occurs when the configured URL is invalid or every connection attempt failed.
    #[error("job manager client initialization failed")]
    JobManager(#[source] job_manager_client::ConnectError),

    /// The result sender could not connect to the broker.
    #[error("result sender initialization failed")]
    Sender(#[source] SendError),

    /// The job receiver could not connect to the broker.
    #[error("job receiver initialization failed")]
    Receiver(#[source] ConsumeError),
}

/// Errors that can occur while the worker is running (Phase 2).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Consuming the service queue failed, typically because the broker connection was lost
    /// and could not be re-established.
    #[error("job consumption failed")]
    Consume(#[source] ConsumeError),

    /// The broker ended the consumer without a shutdown request.
    #[error("consumer of queue '{queue}' ended unexpectedly")]
    ConsumerEnded { queue: String },
}

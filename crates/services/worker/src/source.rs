//! Job intake seam of the service.

use std::future::Future;

use amqp_client::{
    AckError, Acknowledge, ConsumeError, IncomingMessage, JobEnvelope, MessageReceiver,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::workflow::JobOutcome;

/// Delivers jobs to a handler until shut down.
pub trait JobSource {
    type Message: Acknowledge;

    /// Runs `handler` for every received job until `shutdown` fires or the source ends.
    fn consume<F, Fut>(
        &self,
        handler: F,
        shutdown: CancellationToken,
    ) -> impl Future<Output = Result<(), ConsumeError>>
    where
        F: Fn(JobEnvelope<Value>, Self::Message) -> Fut,
        Fut: Future<Output = Result<JobOutcome, AckError>>;

    fn close(&self) -> impl Future<Output = ()>;

    fn queue_name(&self) -> &str;
}

impl JobSource for MessageReceiver {
    type Message = IncomingMessage;

    async fn consume<F, Fut>(
        &self,
        handler: F,
        shutdown: CancellationToken,
    ) -> Result<(), ConsumeError>
    where
        F: Fn(JobEnvelope<Value>, IncomingMessage) -> Fut,
        Fut: Future<Output = Result<JobOutcome, AckError>>,
    {
        MessageReceiver::consume(self, handler, shutdown).await
    }

    async fn close(&self) {
        MessageReceiver::close(self).await
    }

    fn queue_name(&self) -> &str {
        MessageReceiver::queue_name(self)
    }
}

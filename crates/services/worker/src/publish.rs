//! Result publishing seam of the workflow.

use std::future::Future;

use amqp_client::{DeliveryMode, MessageHeaders, MessageSender, OutgoingJob, SendError};
use serde::Serialize;

/// Publishes job results downstream.
pub trait Publish: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn publish<T>(
        &self,
        queue: &str,
        job: OutgoingJob<T>,
        headers: &MessageHeaders,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send
    where
        T: Serialize + Send + Sync;

    /// Releases the connection. Called once on service shutdown.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

impl Publish for MessageSender {
    type Error = SendError;

    async fn publish<T>(
        &self,
        queue: &str,
        job: OutgoingJob<T>,
        headers: &MessageHeaders,
    ) -> Result<(), SendError>
    where
        T: Serialize + Send + Sync,
    {
        self.send(queue, job, headers, DeliveryMode::Persistent)
            .await
    }

    async fn close(&self) {
        MessageSender::close(self).await
    }
}

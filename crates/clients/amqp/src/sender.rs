//! Publishing job envelopes.

use jobflow_config::AmqpConfig;
use lapin::{BasicProperties, options::BasicPublishOptions};
use serde::Serialize;

use crate::{
    connection::ConnectionManager,
    envelope::{JobEnvelope, OutgoingJob},
    error::SendError,
    headers::MessageHeaders,
};

const CONTENT_TYPE_JSON: &str = "application/json";

/// AMQP delivery mode of a published message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Survives a broker restart on a durable queue
    #[default]
    Persistent,
    Transient,
}

impl From<DeliveryMode> for u8 {
    fn from(mode: DeliveryMode) -> Self {
        match mode {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

/// Publishes job envelopes on the default exchange.
///
/// Every envelope is stamped with the sender's origin queue as `from`.
pub struct MessageSender {
    manager: ConnectionManager,
    origin: String,
}

impl MessageSender {
    /// Creates a sender managing the job manager queue and stamping envelopes with the
    /// service queue as origin.
    pub fn new(config: &AmqpConfig) -> Self {
        Self {
            manager: ConnectionManager::new(config, config.job_manager_queue.clone()),
            origin: config.service_queue.clone(),
        }
    }

    pub fn with_manager(manager: ConnectionManager, origin: impl Into<String>) -> Self {
        Self {
            manager,
            origin: origin.into(),
        }
    }

    /// Opens the broker connection ahead of the first publish.
    pub async fn connect(&self) -> Result<(), SendError> {
        self.manager.connect().await?;
        Ok(())
    }

    /// Publishes `job` to `queue_name` and waits for the broker confirm.
    ///
    /// Connects lazily. Headers are attached only when present.
    pub async fn send<T: Serialize>(
        &self,
        queue_name: &str,
        job: OutgoingJob<T>,
        headers: &MessageHeaders,
        mode: DeliveryMode,
    ) -> Result<(), SendError> {
        let session = self.manager.connect().await?;

        let envelope = JobEnvelope::new(self.origin.as_str(), queue_name, job);
        let payload = serde_json::to_vec(&envelope).map_err(SendError::Encode)?;
        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_delivery_mode(mode.into())
            .with_headers(headers.to_field_table());

        let publish_error = |source| SendError::Publish {
            queue: queue_name.to_string(),
            source,
        };
        let confirmation = session
            .channel()
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;
        if confirmation.is_nack() {
            return Err(SendError::NotConfirmed {
                queue: queue_name.to_string(),
            });
        }

        tracing::debug!(
            queue = %queue_name,
            job_id = %envelope.job_id,
            corr_id = headers.correlation_id.as_deref().unwrap_or_default(),
            failed = envelope.is_failure(),
            "job envelope published"
        );
        Ok(())
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// The queue stamped as `from` on every envelope.
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

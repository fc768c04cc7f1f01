//! Broker connection lifecycle.
//!
//! A [`ConnectionManager`] owns one connection and channel for a named queue. Connecting is
//! lazy and idempotent; failed attempts are retried with a fixed delay until the attempt
//! budget runs out, after which the manager reports [`ConnectError::RetriesExhausted`].

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use backon::{ConstantBuilder, Retryable as _};
use jobflow_config::{AmqpConfig, Redacted};
use lapin::{
    Channel, Connection, ConnectionProperties,
    options::{BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions},
    types::FieldTable,
};
use monitoring::logging;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::error::{AttemptError, ConnectError};

/// Queue and retry settings of a managed connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// The managed queue
    pub queue: String,
    /// Declare the queue as durable
    pub durable: bool,
    /// Broker-side limit of unacknowledged deliveries, 0 means unlimited
    pub prefetch_limit: u16,
    /// Attempts allowed before connecting fails for good
    pub max_attempts: u32,
    /// Pause between two attempts
    pub retry_delay: Duration,
    /// Upper bound of a single attempt
    pub attempt_timeout: Duration,
}

impl ConnectionSettings {
    /// Settings for `queue` taken from the broker configuration.
    pub fn from_config(config: &AmqpConfig, queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            durable: config.durable,
            prefetch_limit: config.prefetch_limit,
            max_attempts: config.max_connection_attempts,
            retry_delay: config.connection_retry_delay.into(),
            attempt_timeout: config.connection_timeout.into(),
        }
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Opens and closes broker sessions.
///
/// [`AmqpConnector`] talks to RabbitMQ; other implementations exist to exercise the retry
/// policy without a broker.
pub trait Connector: Send + Sync + 'static {
    type Session: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a session and prepares the queue described by `settings`.
    fn open(
        &self,
        settings: &ConnectionSettings,
    ) -> impl Future<Output = Result<Self::Session, Self::Error>> + Send;

    /// Whether the session can still be used.
    fn is_alive(&self, session: &Self::Session) -> bool;

    /// Closes the session.
    fn close(
        &self,
        session: &Self::Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Manages one broker connection for a single queue.
pub struct ConnectionManager<C: Connector = AmqpConnector> {
    connector: C,
    settings: ConnectionSettings,
    session: Mutex<Option<Arc<C::Session>>>,
    state: RwLock<ConnectionState>,
    attempts: AtomicU32,
}

impl ConnectionManager {
    /// Creates a RabbitMQ connection manager for `queue`.
    pub fn new(config: &AmqpConfig, queue: impl Into<String>) -> Self {
        Self::with_connector(
            AmqpConnector::new(config.uri()),
            ConnectionSettings::from_config(config, queue),
        )
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn with_connector(connector: C, settings: ConnectionSettings) -> Self {
        Self {
            connector,
            settings,
            session: Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            attempts: AtomicU32::new(0),
        }
    }

    /// Returns the open session, connecting first if needed.
    ///
    /// A session whose channel was closed by the broker is discarded and re-established.
    /// Concurrent callers wait for a single connection attempt sequence.
    pub async fn connect(&self) -> Result<Arc<C::Session>, ConnectError> {
        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref() {
            if self.connector.is_alive(session) {
                return Ok(session.clone());
            }
            tracing::warn!(queue = %self.settings.queue, "broker session lost, reconnecting");
            if let Some(stale) = slot.take() {
                self.close_session(&stale).await;
            }
            *self.state.write() = ConnectionState::Disconnected;
        }

        let remaining = self
            .settings
            .max_attempts
            .saturating_sub(self.attempts.load(Ordering::SeqCst));
        if remaining == 0 {
            return Err(ConnectError::RetriesExhausted {
                queue: self.settings.queue.clone(),
                attempts: self.connection_attempts(),
                last_error: None,
            });
        }

        *self.state.write() = ConnectionState::Connecting;

        let result = (|| self.attempt())
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.settings.retry_delay)
                    .with_max_times(remaining as usize - 1),
            )
            .notify(|err, dur| {
                tracing::warn!(
                    queue = %self.settings.queue,
                    attempt = self.connection_attempts(),
                    max_attempts = self.settings.max_attempts,
                    error = %err,
                    error_source = logging::error_source(&err),
                    "Broker connection failed. Retrying in {:.1}s",
                    dur.as_secs_f32()
                );
            })
            .await;

        match result {
            Ok(session) => {
                self.attempts.store(0, Ordering::SeqCst);
                *self.state.write() = ConnectionState::Connected;
                tracing::info!(queue = %self.settings.queue, "connected to broker");

                let session = Arc::new(session);
                *slot = Some(session.clone());
                Ok(session)
            }
            Err(err) => {
                *self.state.write() = ConnectionState::Disconnected;
                let attempts = self.connection_attempts();
                tracing::error!(
                    queue = %self.settings.queue,
                    attempts,
                    error = %err,
                    error_source = logging::error_source(&err),
                    "giving up connecting to broker"
                );

                Err(ConnectError::RetriesExhausted {
                    queue: self.settings.queue.clone(),
                    attempts,
                    last_error: Some(err),
                })
            }
        }
    }

    async fn attempt(&self) -> Result<C::Session, AttemptError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(queue = %self.settings.queue, attempt, "connecting to broker");

        match tokio::time::timeout(
            self.settings.attempt_timeout,
            self.connector.open(&self.settings),
        )
        .await
        {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(err)) => Err(AttemptError::Open(Box::new(err))),
            Err(_) => Err(AttemptError::Timeout(self.settings.attempt_timeout)),
        }
    }

    /// Closes the channel and connection. Does nothing when disconnected.
    pub async fn close(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            self.close_session(&session).await;
            tracing::info!(queue = %self.settings.queue, "broker connection closed");
        }
        *self.state.write() = ConnectionState::Disconnected;
    }

    async fn close_session(&self, session: &C::Session) {
        if let Err(err) = self.connector.close(session).await {
            tracing::debug!(
                queue = %self.settings.queue,
                error = %err,
                error_source = logging::error_source(&err),
                "error while closing broker session"
            );
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn queue_name(&self) -> &str {
        &self.settings.queue
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Attempts made since the last successful connection.
    pub fn connection_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// An open RabbitMQ connection with its channel.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

impl AmqpSession {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

/// [`Connector`] for RabbitMQ.
///
/// Opens a connection on the tokio runtime, a channel with publisher confirms and the
/// configured prefetch limit, and declares the managed queue.
pub struct AmqpConnector {
    uri: Redacted<String>,
}

impl AmqpConnector {
    pub fn new(uri: Redacted<String>) -> Self {
        Self { uri }
    }
}

impl Connector for AmqpConnector {
    type Session = AmqpSession;
    type Error = lapin::Error;

    async fn open(&self, settings: &ConnectionSettings) -> Result<AmqpSession, lapin::Error> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(self.uri.as_str(), properties).await?;

        let channel = connection.create_channel().await?;
        channel
            .basic_qos(settings.prefetch_limit, BasicQosOptions::default())
            .await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        channel
            .queue_declare(
                &settings.queue,
                QueueDeclareOptions {
                    durable: settings.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(AmqpSession {
            connection,
            channel,
        })
    }

    fn is_alive(&self, session: &AmqpSession) -> bool {
        session.connection.status().connected() && session.channel.status().connected()
    }

    async fn close(&self, session: &AmqpSession) -> Result<(), lapin::Error> {
        if session.channel.status().connected() {
            session.channel.close(200, "OK").await?;
        }
        if session.connection.status().connected() {
            session.connection.close(200, "OK").await?;
        }
        Ok(())
    }
}

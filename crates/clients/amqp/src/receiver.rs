//! Consuming job envelopes.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{Stream, StreamExt as _, TryStreamExt as _};
use jobflow_config::AmqpConfig;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions},
    types::FieldTable,
};
use monitoring::logging;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    connection::ConnectionManager,
    envelope::JobEnvelope,
    error::{AckError, ConsumeError},
    headers::MessageHeaders,
};

/// Settlement of a received job.
///
/// Exactly one of [`ack`](Self::ack) or [`nack`](Self::nack) succeeds per message.
pub trait Acknowledge: Send + Sync {
    /// Transport metadata of the message.
    fn headers(&self) -> &MessageHeaders;

    fn ack(&self) -> impl Future<Output = Result<(), AckError>> + Send;

    /// Rejects the message, returning it to the queue when `requeue` is set.
    fn nack(&self, requeue: bool) -> impl Future<Output = Result<(), AckError>> + Send;
}

/// A delivery handed to the job handler.
#[derive(Clone)]
pub struct IncomingMessage {
    acker: Acker,
    delivery_tag: u64,
    headers: MessageHeaders,
    settled: Arc<AtomicBool>,
}

impl IncomingMessage {
    fn from_delivery(delivery: &Delivery) -> Self {
        let headers = delivery
            .properties
            .headers()
            .as_ref()
            .map(MessageHeaders::from_field_table)
            .unwrap_or_default();

        Self {
            acker: delivery.acker.clone(),
            delivery_tag: delivery.delivery_tag,
            headers,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    fn mark_settled(&self) -> Result<(), AckError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(AckError::AlreadySettled {
                delivery_tag: self.delivery_tag,
            });
        }
        Ok(())
    }

    fn broker_error(&self, source: lapin::Error) -> AckError {
        AckError::Broker {
            delivery_tag: self.delivery_tag,
            source,
        }
    }
}

impl Acknowledge for IncomingMessage {
    fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    async fn ack(&self) -> Result<(), AckError> {
        self.mark_settled()?;
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|err| self.broker_error(err))
    }

    async fn nack(&self, requeue: bool) -> Result<(), AckError> {
        self.mark_settled()?;
        self.acker
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await
            .map_err(|err| self.broker_error(err))
    }
}

impl std::fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("delivery_tag", &self.delivery_tag)
            .field("headers", &self.headers)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Consumes job envelopes from the service queue.
pub struct MessageReceiver {
    manager: ConnectionManager,
}

impl MessageReceiver {
    /// Creates a receiver for the configured service queue.
    pub fn new(config: &AmqpConfig) -> Self {
        Self {
            manager: ConnectionManager::new(config, config.service_queue.clone()),
        }
    }

    pub fn with_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Opens the broker connection and declares the queue ahead of consuming.
    pub async fn connect(&self) -> Result<(), ConsumeError> {
        self.manager.connect().await?;
        Ok(())
    }

    /// Drives deliveries through `handler` until `shutdown` fires or the consumer ends.
    ///
    /// At most `prefetch_limit` handler futures run concurrently. Messages whose body does not
    /// decode into a [`JobEnvelope<T>`] are acked and dropped. When the handler fails without
    /// settling its message, the message is acked so it is not redelivered forever. The value
    /// returned by a successful handler is ignored.
    ///
    /// On shutdown no new deliveries are taken; handlers already running complete. When the
    /// consumer stream itself fails, `consume` returns the error immediately and handlers still
    /// running are dropped. Their messages stay unacked and are redelivered by the broker once
    /// the channel is gone.
    pub async fn consume<T, F, Fut, R, E>(
        &self,
        handler: F,
        shutdown: CancellationToken,
    ) -> Result<(), ConsumeError>
    where
        T: DeserializeOwned,
        F: Fn(JobEnvelope<T>, IncomingMessage) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::error::Error,
    {
        let session = self.manager.connect().await?;
        let queue = self.manager.queue_name();
        let settings = self.manager.settings();

        let consumer_tag = format!("{queue}-{}", std::process::id());
        let consumer = session
            .channel()
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| ConsumeError::Subscribe {
                queue: queue.to_string(),
                source,
            })?;
        tracing::info!(
            queue = %queue,
            prefetch_limit = settings.prefetch_limit,
            "consuming jobs"
        );

        let deliveries = consumer.map(|delivery| match delivery {
            Ok(mut delivery) => {
                let message = IncomingMessage::from_delivery(&delivery);
                Ok((std::mem::take(&mut delivery.data), message))
            }
            Err(source) => Err(ConsumeError::Delivery {
                queue: queue.to_string(),
                source,
            }),
        });
        let result = dispatch(
            queue,
            deliveries,
            usize::from(settings.prefetch_limit),
            &shutdown,
            &handler,
        )
        .await;

        if shutdown.is_cancelled() {
            tracing::info!(queue = %queue, "shutdown requested, stopped consuming");
            if let Err(err) = session
                .channel()
                .basic_cancel(&consumer_tag, BasicCancelOptions::default())
                .await
            {
                tracing::debug!(
                    queue = %queue,
                    error = %err,
                    error_source = logging::error_source(&err),
                    "failed to cancel consumer"
                );
            }
        }

        result
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn queue_name(&self) -> &str {
        self.manager.queue_name()
    }
}

/// A received message whose settlement can be observed.
trait Delivered: Acknowledge + Clone {
    fn delivery_tag(&self) -> u64;

    fn is_settled(&self) -> bool;
}

impl Delivered for IncomingMessage {
    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn is_settled(&self) -> bool {
        IncomingMessage::is_settled(self)
    }
}

/// Runs `handler` over `deliveries`, at most `limit` at a time (0 means unbounded), until
/// `shutdown` fires or the stream ends or fails.
async fn dispatch<S, M, T, F, Fut, R, E>(
    queue: &str,
    deliveries: S,
    limit: usize,
    shutdown: &CancellationToken,
    handler: &F,
) -> Result<(), ConsumeError>
where
    S: Stream<Item = Result<(Vec<u8>, M), ConsumeError>>,
    M: Delivered,
    T: DeserializeOwned,
    F: Fn(JobEnvelope<T>, M) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: std::error::Error,
{
    deliveries
        .take_until(shutdown.cancelled())
        .try_for_each_concurrent(limit, |(data, message)| async move {
            process_delivery(queue, &data, message, handler).await;
            Ok(())
        })
        .await
}

async fn process_delivery<M, T, F, Fut, R, E>(queue: &str, data: &[u8], message: M, handler: &F)
where
    M: Delivered,
    T: DeserializeOwned,
    F: Fn(JobEnvelope<T>, M) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: std::error::Error,
{
    let envelope = match serde_json::from_slice::<JobEnvelope<T>>(data) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(
                queue = %queue,
                delivery_tag = message.delivery_tag(),
                error = %err,
                "dropping message that is not a valid job envelope"
            );
            settle_unhandled(queue, &message).await;
            return;
        }
    };

    let job_id = envelope.job_id.clone();
    let guard = message.clone();
    if let Err(err) = handler(envelope, message).await {
        tracing::error!(
            queue = %queue,
            job_id = %job_id,
            corr_id = guard.headers().correlation_id.as_deref().unwrap_or_default(),
            error = %err,
            error_source = logging::error_source(&err),
            "job handler failed"
        );
        if !guard.is_settled() {
            settle_unhandled(queue, &guard).await;
        }
    }
}

async fn settle_unhandled<M: Delivered>(queue: &str, message: &M) {
    if let Err(err) = message.ack().await {
        tracing::warn!(
            queue = %queue,
            delivery_tag = message.delivery_tag(),
            error = %err,
            error_source = logging::error_source(&err),
            "failed to ack message"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use serde_json::{Value, json};

    use super::*;

    /// Counts settlements instead of talking to a broker.
    #[derive(Debug, Clone, Default)]
    struct FakeMessage {
        headers: MessageHeaders,
        settled: Arc<AtomicBool>,
        acks: Arc<AtomicUsize>,
        nacks: Arc<AtomicUsize>,
    }

    impl Acknowledge for FakeMessage {
        fn headers(&self) -> &MessageHeaders {
            &self.headers
        }

        async fn ack(&self) -> Result<(), AckError> {
            self.settled.store(true, Ordering::SeqCst);
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nack(&self, _requeue: bool) -> Result<(), AckError> {
            self.settled.store(true, Ordering::SeqCst);
            self.nacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Delivered for FakeMessage {
        fn delivery_tag(&self) -> u64 {
            1
        }

        fn is_settled(&self) -> bool {
            self.settled.load(Ordering::SeqCst)
        }
    }

    fn job_body(job_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "from": "JobManager",
            "to": "Exif",
            "time": "2024-05-01T12:00:00Z",
            "jobId": job_id,
            "errors": [],
            "filepath": "a.jpg",
            "md5": "abc",
            "message": {},
        }))
        .expect("body should serialize")
    }

    #[tokio::test]
    async fn undecodable_body_is_acked_without_calling_handler() {
        //* Given
        let message = FakeMessage::default();
        let calls = AtomicUsize::new(0);
        let handler = |_job: JobEnvelope<Value>, _message: FakeMessage| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, io::Error>(()) }
        };

        //* When
        process_delivery("Exif", b"not json", message.clone(), &handler).await;

        //* Then
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(message.acks.load(Ordering::SeqCst), 1);
        assert_eq!(message.nacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_handler_that_left_message_unsettled_gets_acked() {
        //* Given
        let message = FakeMessage::default();
        let handler = |_job: JobEnvelope<Value>, _message: FakeMessage| async {
            Err::<(), _>(io::Error::other("handler crashed"))
        };

        //* When
        process_delivery("Exif", &job_body("1"), message.clone(), &handler).await;

        //* Then
        assert_eq!(message.acks.load(Ordering::SeqCst), 1);
        assert_eq!(message.nacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_handler_that_settled_is_not_acked_again() {
        //* Given
        let message = FakeMessage::default();
        let handler = |_job: JobEnvelope<Value>, message: FakeMessage| async move {
            message.nack(true).await?;
            Err::<(), _>(AckError::AlreadySettled { delivery_tag: 1 })
        };

        //* When
        process_delivery("Exif", &job_body("1"), message.clone(), &handler).await;

        //* Then
        assert_eq!(message.acks.load(Ordering::SeqCst), 0);
        assert_eq!(message.nacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_handler_owns_settlement() {
        let message = FakeMessage::default();
        let seen = std::sync::Mutex::new(Vec::new());
        let handler = |job: JobEnvelope<Value>, _message: FakeMessage| {
            seen.lock().expect("lock should not be poisoned").push(job.job_id);
            async { Ok::<_, io::Error>(()) }
        };

        process_delivery("Exif", &job_body("42"), message.clone(), &handler).await;

        assert_eq!(*seen.lock().expect("lock should not be poisoned"), ["42"]);
        assert_eq!(message.acks.load(Ordering::SeqCst), 0);
        assert_eq!(message.nacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_runs_at_most_limit_handlers_at_once() {
        //* Given
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));
        let deliveries = futures::stream::iter((0..6).map(|id| {
            Ok::<_, ConsumeError>((job_body(&id.to_string()), FakeMessage::default()))
        }));
        let handler = {
            let (in_flight, peak, handled) = (in_flight.clone(), peak.clone(), handled.clone());
            move |_job: JobEnvelope<Value>, message: FakeMessage| {
                let (in_flight, peak, handled) =
                    (in_flight.clone(), peak.clone(), handled.clone());
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    handled.fetch_add(1, Ordering::SeqCst);
                    message.ack().await
                }
            }
        };

        //* When
        let result = dispatch("Exif", deliveries, 2, &CancellationToken::new(), &handler).await;

        //* Then
        assert!(result.is_ok());
        assert_eq!(handled.load(Ordering::SeqCst), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispatch_returns_on_shutdown_while_stream_stays_open() {
        //* Given
        let (tx, rx) =
            futures::channel::mpsc::unbounded::<Result<(Vec<u8>, FakeMessage), ConsumeError>>();
        tx.unbounded_send(Ok((job_body("1"), FakeMessage::default())))
            .expect("channel should be open");
        let shutdown = CancellationToken::new();
        let handled = AtomicUsize::new(0);
        let handler = |_job: JobEnvelope<Value>, message: FakeMessage| {
            handled.fetch_add(1, Ordering::SeqCst);
            shutdown.cancel();
            async move { message.ack().await }
        };

        //* When
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            dispatch("Exif", rx, 2, &shutdown, &handler),
        )
        .await
        .expect("dispatch should stop after shutdown");

        //* Then
        assert!(result.is_ok());
        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert!(!tx.is_closed());
    }

    #[tokio::test]
    async fn dispatch_stops_on_stream_error() {
        let error = ConsumeError::Connect(crate::error::ConnectError::RetriesExhausted {
            queue: "Exif".to_string(),
            attempts: 1,
            last_error: None,
        });
        let deliveries =
            futures::stream::iter(vec![Err::<(Vec<u8>, FakeMessage), _>(error)]);
        let handler = |_job: JobEnvelope<Value>, _message: FakeMessage| async {
            Ok::<_, io::Error>(())
        };

        let result = dispatch("Exif", deliveries, 2, &CancellationToken::new(), &handler).await;

        assert!(matches!(result, Err(ConsumeError::Connect(_))));
    }
}

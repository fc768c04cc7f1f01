use std::future::Future;

use amqp_client::{MessageReceiver, MessageSender};
use job_manager_client::JobManagerClient;
use jobflow_config::Config;
use tokio_util::sync::CancellationToken;

mod error;

pub use self::error::{InitError, RuntimeError};
use crate::{
    extract::Extract, fetch::FetchData, publish::Publish, source::JobSource, workflow::Workflow,
};

/// Run the worker service
///
/// Uses a two-phase initialization pattern:
///
/// - **Phase 1 (Initialization)**: connect the job manager client, the result sender and the
///   job receiver, in that order. Errors in this phase are returned as [`InitError`].
/// - **Phase 2 (Runtime)**: consume jobs until [`Handle::shutdown`] is called, then close the
///   receiver, the sender and the job manager client, in that order. Errors in this phase
///   are returned as [`RuntimeError`].
pub async fn new<X: Extract>(
    config: Config,
    extractor: X,
) -> Result<(Handle, impl Future<Output = Result<(), RuntimeError>>), InitError> {
    tracing::info!(url = %config.grpc.job_manager_url, "connecting to job manager");
    let fetch_client = JobManagerClient::new(&config.grpc).map_err(InitError::JobManager)?;
    fetch_client.connect().await.map_err(InitError::JobManager)?;

    tracing::info!(broker = %config.amqp.address(), "connecting to message broker");
    let sender = MessageSender::new(&config.amqp);
    sender.connect().await.map_err(InitError::Sender)?;
    let receiver = MessageReceiver::new(&config.amqp);
    receiver.connect().await.map_err(InitError::Receiver)?;

    tracing::info!(
        service_queue = %config.amqp.service_queue,
        job_manager_queue = %config.amqp.job_manager_queue,
        description = extractor.description(),
        "worker ready"
    );

    let workflow = Workflow::new(
        fetch_client,
        extractor,
        sender,
        config.amqp.job_manager_queue.clone(),
    );

    Ok(run(receiver, workflow))
}

/// Runs `workflow` over the jobs of `source` (Phase 2 of [`new`]).
///
/// The returned future consumes until [`Handle::shutdown`] is called or the source ends. It then
/// closes the source, the publisher and the fetcher, in that order. A source that ends without a
/// shutdown request yields [`RuntimeError::ConsumerEnded`].
pub fn run<S, F, X, P>(
    source: S,
    workflow: Workflow<F, X, P>,
) -> (Handle, impl Future<Output = Result<(), RuntimeError>>)
where
    S: JobSource,
    F: FetchData,
    X: Extract,
    P: Publish,
{
    let shutdown = CancellationToken::new();
    let handle = Handle {
        shutdown: shutdown.clone(),
    };

    let fut = async move {
        let result = source
            .consume(
                |job, message| workflow.handle_job(job, message),
                shutdown.clone(),
            )
            .await;

        tracing::warn!("closing service and all connections");
        source.close().await;
        let (fetcher, publisher) = workflow.into_parts();
        publisher.close().await;
        fetcher.close().await;
        tracing::info!("service closed");

        result.map_err(RuntimeError::Consume)?;
        if !shutdown.is_cancelled() {
            return Err(RuntimeError::ConsumerEnded {
                queue: source.queue_name().to_string(),
            });
        }
        Ok(())
    };

    (handle, fut)
}

/// Handle to stop a running worker service.
#[derive(Debug, Clone)]
pub struct Handle {
    shutdown: CancellationToken,
}

impl Handle {
    /// Stops taking new jobs. The service future completes once in-flight jobs are settled and
    /// connections are closed.
    pub fn shutdown(&self) {
        tracing::info!("worker shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

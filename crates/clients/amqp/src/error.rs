use std::time::Duration;

/// Boxed error returned by a [`Connector`](crate::Connector) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that occur when establishing a broker connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Every allowed connection attempt failed.
    ///
    /// This error is fatal: the manager will not try again. `last_error` is `None` when the
    /// attempt budget was already spent by an earlier call.
    #[error("failed to connect to queue '{queue}' after {attempts} attempts")]
    RetriesExhausted {
        queue: String,
        attempts: u32,
        #[source]
        last_error: Option<AttemptError>,
    },
}

/// Failure of a single connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// Opening the connection, the channel or declaring the queue failed
    #[error("failed to open broker session")]
    Open(#[source] BoxError),

    /// The attempt did not complete in time
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that occur when publishing a job envelope.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No broker connection could be established
    #[error("broker connection unavailable")]
    Connect(#[from] ConnectError),

    /// The envelope could not be serialized to JSON
    #[error("failed to encode job envelope")]
    Encode(#[source] serde_json::Error),

    /// The broker rejected or failed the publish
    #[error("failed to publish to queue '{queue}'")]
    Publish {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    /// The broker negatively confirmed the publish
    #[error("broker did not confirm publish to queue '{queue}'")]
    NotConfirmed { queue: String },
}

/// Errors that end consumption of a queue.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    /// No broker connection could be established
    #[error("broker connection unavailable")]
    Connect(#[from] ConnectError),

    /// Starting the consumer failed
    #[error("failed to start consuming queue '{queue}'")]
    Subscribe {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    /// The consumer stream yielded an error, typically a lost connection
    #[error("consumer of queue '{queue}' failed")]
    Delivery {
        queue: String,
        #[source]
        source: lapin::Error,
    },
}

/// Errors that occur when settling a delivery.
#[derive(Debug, thiserror::Error)]
pub enum AckError {
    /// The delivery was already acked or nacked
    #[error("delivery {delivery_tag} was already settled")]
    AlreadySettled { delivery_tag: u64 },

    /// The broker rejected the acknowledgment
    #[error("failed to settle delivery {delivery_tag}")]
    Broker {
        delivery_tag: u64,
        #[source]
        source: lapin::Error,
    },
}

//! RabbitMQ plumbing for jobflow workers.
//!
//! A worker owns two broker connections, each managed by a [`ConnectionManager`]:
//! a [`MessageReceiver`] consuming jobs from the service queue and a [`MessageSender`]
//! publishing results to the job manager queue. Messages are JSON [`JobEnvelope`]s with the
//! correlation id and credential carried in AMQP headers ([`MessageHeaders`]).

pub mod connection;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod receiver;
pub mod sender;

pub use self::{
    connection::{
        AmqpConnector, AmqpSession, ConnectionManager, ConnectionSettings, ConnectionState,
        Connector,
    },
    envelope::{JobEnvelope, OutgoingJob},
    error::{AckError, AttemptError, ConnectError, ConsumeError, SendError},
    headers::MessageHeaders,
    receiver::{Acknowledge, IncomingMessage, MessageReceiver},
    sender::{DeliveryMode, MessageSender},
};

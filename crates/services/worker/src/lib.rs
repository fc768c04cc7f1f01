//! Queue-driven extraction worker.
//!
//! A worker consumes job envelopes from its service queue, fetches each job's payload from the
//! job manager over gRPC, runs a pluggable [`Extract`] step on it and publishes the result, or
//! a failure envelope, to the job manager queue. Failures are classified into a closed set of
//! [`FailureKind`]s which decide whether a job is requeued.
//!
//! [`service::new`] wires the RabbitMQ and gRPC clients into a running [`Workflow`].

pub mod extract;
pub mod failure;
pub mod fetch;
pub mod publish;
pub mod service;
pub mod source;
pub mod workflow;

pub use self::{
    extract::{Extract, ExtractError, ExtractErrorKind},
    failure::{Classify, Disposition, FailureKind, JobFailure},
    fetch::FetchData,
    publish::Publish,
    service::{Handle, InitError, RuntimeError},
    source::JobSource,
    workflow::{JobOutcome, Workflow},
};

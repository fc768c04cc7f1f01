//! gRPC client for the job manager data service.
//!
//! Workers fetch job payloads by path through [`JobManagerClient::fetch`], a server-streaming
//! `getData` call whose chunks are concatenated in order.

mod client;
pub mod error;
pub mod proto;

pub use self::{
    client::{AUTHORIZATION_KEY, CORRELATION_ID_KEY, JobManagerClient},
    error::{AttemptError, ConnectError, FetchError},
};

//! Configuration for jobflow worker services.
//!
//! A worker is configured from a TOML file layered with `JOBFLOW_CONFIG_*` environment
//! variables. Nested keys are separated by a double underscore, e.g.
//! `JOBFLOW_CONFIG_AMQP__SERVICE_QUEUE` maps to `amqp.service_queue`.
//!
//! ```toml
//! [amqp]
//! host = "rabbitmq"
//! service_queue = "Classifier"
//! prefetch_limit = 4
//!
//! [grpc]
//! job_manager_url = "http://service-jobs:5042"
//! ```

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format as _, Toml},
};

mod amqp;
mod duration;
mod grpc;
mod redacted;

pub use self::{
    amqp::{AmqpConfig, DEFAULT_JOB_MANAGER_QUEUE, DEFAULT_PREFETCH_LIMIT},
    duration::ConfigDuration,
    grpc::{DEFAULT_JOB_MANAGER_URL, GrpcConfig},
    redacted::Redacted,
};

/// Prefix of the environment variables overriding config file values.
pub const ENV_PREFIX: &str = "JOBFLOW_CONFIG_";

/// Default number of connection attempts before a connection failure becomes fatal.
pub const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 10;

/// Configuration of a jobflow worker service.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Message broker settings
    pub amqp: AmqpConfig,
    /// Job manager gRPC settings
    #[serde(default)]
    pub grpc: GrpcConfig,
}

/// Load the configuration from a TOML file with env-var overrides.
///
/// `JOBFLOW_CONFIG_*` environment variables take priority over values in the file. A missing
/// file is not an error: the configuration can be provided entirely through the environment.
pub fn load(config_path: &Path) -> Result<Config, LoadConfigError> {
    if !config_path.exists() {
        tracing::warn!(
            path = %config_path.display(),
            "config file not found, reading configuration from the environment only"
        );
    }

    extract(
        Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__")),
    )
}

fn extract(figment: Figment) -> Result<Config, LoadConfigError> {
    figment
        .extract()
        .map_err(|err| LoadConfigError(Box::new(err)))
}

/// Serde default for the `max_connection_attempts` settings.
fn default_max_connection_attempts() -> u32 {
    DEFAULT_MAX_CONNECTION_ATTEMPTS
}

/// Error when loading the configuration.
#[derive(Debug, thiserror::Error)]
#[error("Failed to load configuration: {0}")]
pub struct LoadConfigError(#[source] pub Box<figment::Error>);

//! Message broker settings.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::{ConfigDuration, Redacted, default_max_connection_attempts};

/// Default queue receiving job results.
pub const DEFAULT_JOB_MANAGER_QUEUE: &str = "JobManager";

/// Default maximum number of unacknowledged messages in flight.
pub const DEFAULT_PREFETCH_LIMIT: u16 = 10;

/// RabbitMQ connection and queue settings.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AmqpConfig {
    /// Broker host name (default: `localhost`)
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port (default: 5672)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Broker user (default: `admin`)
    #[serde(default = "default_username")]
    pub username: String,
    /// Broker password (default: `secret`)
    #[serde(default = "default_password")]
    pub password: Redacted<String>,
    /// Virtual host (default: `/`)
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Queue this service consumes jobs from. Also used as the `from` field of every message
    /// this service publishes.
    pub service_queue: String,
    /// Queue receiving job results (default: `JobManager`)
    #[serde(default = "default_job_manager_queue")]
    pub job_manager_queue: String,
    /// Maximum number of unacknowledged messages delivered at once, 0 means unlimited
    /// (default: 10)
    #[serde(default = "default_prefetch_limit")]
    pub prefetch_limit: u16,
    /// Declare queues as durable (default: true)
    #[serde(default = "default_durable")]
    pub durable: bool,
    /// Connection attempts before giving up (default: 10)
    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,
    /// Delay between connection attempts in seconds (default: 2)
    #[serde(default, rename = "connection_retry_delay_secs")]
    pub connection_retry_delay: ConfigDuration<2>,
    /// Timeout of a single connection attempt in seconds (default: 5)
    #[serde(default, rename = "connection_timeout_secs")]
    pub connection_timeout: ConfigDuration<5>,
}

impl AmqpConfig {
    /// Creates a configuration for the given service queue with all other settings at their
    /// defaults.
    pub fn new(service_queue: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            vhost: default_vhost(),
            service_queue: service_queue.into(),
            job_manager_queue: default_job_manager_queue(),
            prefetch_limit: DEFAULT_PREFETCH_LIMIT,
            durable: default_durable(),
            max_connection_attempts: default_max_connection_attempts(),
            connection_retry_delay: Default::default(),
            connection_timeout: Default::default(),
        }
    }

    /// Returns the AMQP URI for these connection settings.
    pub fn uri(&self) -> Redacted<String> {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            utf8_percent_encode(&self.username, NON_ALPHANUMERIC),
            utf8_percent_encode(&self.password, NON_ALPHANUMERIC),
            self.host,
            self.port,
            utf8_percent_encode(&self.vhost, NON_ALPHANUMERIC),
        )
        .into()
    }

    /// Returns the broker address without credentials, for logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> Redacted<String> {
    "secret".to_string().into()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_job_manager_queue() -> String {
    DEFAULT_JOB_MANAGER_QUEUE.to_string()
}

fn default_prefetch_limit() -> u16 {
    DEFAULT_PREFETCH_LIMIT
}

fn default_durable() -> bool {
    true
}

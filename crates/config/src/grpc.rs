//! Job manager gRPC settings.

use crate::{ConfigDuration, default_max_connection_attempts};

/// Default job manager gRPC endpoint.
pub const DEFAULT_JOB_MANAGER_URL: &str = "http://localhost:5042";

/// Settings of the channel to the job manager data service.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GrpcConfig {
    /// Job manager endpoint URL (default: `http://localhost:5042`)
    #[serde(default = "default_job_manager_url")]
    pub job_manager_url: String,
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

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            job_manager_url: default_job_manager_url(),
            max_connection_attempts: default_max_connection_attempts(),
            connection_retry_delay: Default::default(),
            connection_timeout: Default::default(),
        }
    }
}

fn default_job_manager_url() -> String {
    DEFAULT_JOB_MANAGER_URL.to_string()
}

//! A set of utilities to enable logging configuration using tracing_subscriber.

use std::{io::IsTerminal, sync::Once};

use tracing::field::DisplayValue;
use tracing_subscriber::{
    EnvFilter,
    filter::{Directive, LevelFilter},
};

/// Environment variable setting the default log level for all workspace crates.
static JOBFLOW_LOG_ENV_VAR: &str = "JOBFLOW_LOG";

/// Initializes a tracing subscriber for logging.
pub fn init() {
    // Since we also use this function to enable logging in tests, wrap it in `Once` to prevent
    // multiple initializations.
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, log_level) = env_filter_and_log_level();

        // A subscriber may already be installed by the test harness
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .try_init();

        tracing::info!("log level: {}", log_level);
    });
}

/// Renders the source chain of an error for use as a structured log field.
///
/// The top-level error is expected to be logged separately (usually as `error = %err`), so only
/// its sources are included, joined by ` -> `. Errors without a source render as an empty string.
///
/// ```ignore
/// tracing::warn!(error = %err, error_source = logging::error_source(&err), "publish failed");
/// ```
pub fn error_source(err: &dyn std::error::Error) -> DisplayValue<String> {
    tracing::field::display(source_chain(err))
}

fn source_chain(err: &dyn std::error::Error) -> String {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain.join(" -> ")
}

/// List of crates in the workspace.
const WORKSPACE_CRATES: &[&str] = &[
    "amqp_client",
    "job_manager_client",
    "jobflow_config",
    "jobflow_worker",
    "monitoring",
    "worker",
];

fn env_filter_and_log_level() -> (EnvFilter, String) {
    // Parse directives from RUST_LOG
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::ERROR.into())
        .parse_lossy(&directive_string);

    let log_level = std::env::var(JOBFLOW_LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());

    for crate_name in WORKSPACE_CRATES {
        // Add directives for each workspace crate, if not overriden by RUST_LOG
        if directive_string.contains(&format!("{crate_name}=")) {
            continue;
        }
        match format!("{crate_name}={log_level}").parse::<Directive>() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(err) => {
                eprintln!("ignoring invalid {JOBFLOW_LOG_ENV_VAR} value '{log_level}': {err}");
                break;
            }
        }
    }

    (env_filter, log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    #[derive(Debug, thiserror::Error)]
    #[error("broker unreachable")]
    struct Unreachable(#[source] Refused);

    #[derive(Debug, thiserror::Error)]
    #[error("failed to publish")]
    struct PublishFailed(#[source] Unreachable);

    #[test]
    fn source_chain_lists_every_cause_in_order() {
        let err = PublishFailed(Unreachable(Refused));

        assert_eq!(source_chain(&err), "broker unreachable -> connection refused");
    }

    #[test]
    fn source_chain_is_empty_without_sources() {
        assert_eq!(source_chain(&Refused), "");
    }

    #[test]
    fn init_can_be_called_repeatedly() {
        init();
        init();
    }

    /// If this fails, just update the above `WORKSPACE_CRATES` to match reality.
    #[test]
    fn assert_workspace_crates() {
        use cargo_metadata::MetadataCommand;

        let cmd = MetadataCommand::new()
            .exec()
            .expect("cargo metadata should run");
        let mut names: Vec<String> = cmd
            .workspace_packages()
            .into_iter()
            .map(|pkg| pkg.name.replace('-', "_"))
            .collect();
        names.sort();
        assert_eq!(names, WORKSPACE_CRATES);
    }
}

use std::path::PathBuf;

mod digest;

use self::digest::PayloadDigest;

#[derive(Debug, clap::Parser)]
#[command(version)]
struct Args {
    /// The configuration file to use. Values can be overridden with `JOBFLOW_CONFIG_*`
    /// environment variables, e.g. `JOBFLOW_CONFIG_AMQP__SERVICE_QUEUE=Exif`.
    #[arg(long, env = "JOBFLOW_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    monitoring::logging::init();

    if let Err(err) = main_inner().await {
        // Manually print the error so we can control the format.
        let err = error_with_causes(&err);
        eprintln!("Exiting with error: {err}");
        std::process::exit(1);
    }
}

async fn main_inner() -> Result<(), Error> {
    let Args {
        config: config_path,
    } = clap::Parser::parse();

    tracing::info!("version {}", env!("CARGO_PKG_VERSION"));

    let config = jobflow_config::load(&config_path)?;
    let (handle, service) = worker::service::new(config, PayloadDigest).await?;
    let mut service = std::pin::pin!(service);

    tokio::select! {
        result = &mut service => result?,
        _ = shutdown_signal() => {
            handle.shutdown();
            service.await?;
        }
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Config(#[from] jobflow_config::LoadConfigError),
    #[error("worker initialization failed")]
    Init(#[from] worker::InitError),
    #[error("worker failed")]
    Runtime(#[from] worker::RuntimeError),
}

/// Completes on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(err), _) | (_, Err(err)) => {
                    tracing::error!(error = %err, "failed to install signal handlers");
                    return std::future::pending().await;
                }
            };
        tokio::select! {
            _ = sigint.recv() => tracing::info!(signal = "SIGINT", "shutdown signal"),
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "shutdown signal"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        tracing::info!("shutdown signal");
    }
}

fn error_with_causes(err: &dyn std::error::Error) -> String {
    let mut error_chain = Vec::new();
    let mut current = err;
    while let Some(source) = current.source() {
        error_chain.push(source.to_string());
        current = source;
    }

    if error_chain.is_empty() {
        err.to_string()
    } else {
        format!("{} | Caused by: {}", err, error_chain.join(" -> "))
    }
}

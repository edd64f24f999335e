use agent::Agent;
use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use common::util::trace::{initialize_tracing, LogFormat};
use common::AgentConfig;
use std::future::Future;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let format = if args.log_json() {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    initialize_tracing(format)?;
    info!("telemetryd started");

    log_failure(run(&args).await)
}

async fn run(args: &Cli) -> Result<()> {
    let mut config = AgentConfig::load_from_file_and_env(args.config().as_deref())
        .context("Failed to load configuration")?;
    args.apply_overrides(&mut config);
    let config = config.validated().context("Invalid configuration")?;
    info!(?config, "Configuration loaded");

    let agent = Agent::from_config(config)?;
    let report = agent.run(interrupt_signal()?).await?;

    info!(pending = report.pending(), "BYE!");
    Ok(())
}

/// Fatal errors go through the log pipeline too, so they show up as
/// structured lines under `--log-json`.
fn log_failure<T>(result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "telemetryd stopped with an error");
    }
    result
}

/// Resolves on the first SIGINT. The handler is installed up front so a
/// failure to install it aborts startup.
fn interrupt_signal() -> Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        Ok(async move {
            sigint.recv().await;
            info!("Received SIGINT, initiating graceful shutdown");
        })
    }
    #[cfg(not(unix))]
    {
        Ok(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, initiating graceful shutdown");
        })
    }
}

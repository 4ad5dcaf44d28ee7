use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use kvmini_engine::EngineError;
use kvmini_engine::cli::{Cli, Command};
use kvmini_engine::config::EngineConfig;
use kvmini_engine::run::{RunReport, run_fairness, run_loadtest};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cancel `token` on the first Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping run");
                token.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

async fn execute(cli: Cli, cancel: CancellationToken) -> Result<RunReport, EngineError> {
    let engine = EngineConfig::from_env();
    let now = chrono::Local::now();

    match cli.command {
        Command::Loadtest(args) => {
            let config = args.into_config(&engine, now)?;
            info!(
                "Load test: {} requests, concurrency {}, pattern {}",
                config.requests, config.concurrency, config.schedule.pattern
            );
            run_loadtest(config, cancel).await
        }
        Command::Fairness(args) => {
            let config = args.into_config(&engine, now)?;
            run_fairness(config, cancel).await
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    match execute(cli, cancel).await {
        Ok(report) => {
            info!(
                "Run complete: {}/{} requests succeeded, artifacts in {:?}",
                report.success_count(),
                report.records.len(),
                report.run_dir
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ (EngineError::Interrupted | EngineError::Config(_))) => {
            error!("{}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
        Err(e) => Err(e).context("kvmini run failed"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kvmini=info,kvmini_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

//! help-relay entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: flags with environment fallbacks, validated
//!    into [`config::RelayConfig`].
//! 2. **Wire observability**: `tracing-subscriber` with a JSON or text layer
//!    and an optional OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the GitHub search client, the Discord
//!    deliverer and the JSON state file, injected into [`poller::PollCycle`].
//! 4. **Run**: one cycle with `--once`, otherwise the [`poller::Scheduler`]
//!    until SIGINT or SIGTERM.

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use discord::{DiscordConfig, DiscordDeliverer};
use github::{GithubSearchClient, GithubSearchConfig};
use poller::{CycleSettings, PollCycle, Scheduler, SchedulerSettings};
use relay::Deliverer;
use state::JsonFileStateStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Cli, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = telemetry::init(cli.log_format)?;

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %format_args!("{e:#}"), "help-relay exited with an error");
    }

    telemetry.shutdown();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RelayConfig::from_cli(cli)?;
    info!(
        organizations = ?config.organizations,
        channel_id = %config.channel_id,
        interval_secs = config.poll_interval.as_secs(),
        state_file = %config.state_file.display(),
        "help-relay starting"
    );

    let search = GithubSearchClient::new(GithubSearchConfig {
        api_url: config.github_api_url.clone(),
        token: config.github_token.clone(),
        label: config.label.clone(),
        ..GithubSearchConfig::default()
    })
    .context("building GitHub client")?;

    let deliverer: Arc<dyn Deliverer> = Arc::new(
        DiscordDeliverer::new(DiscordConfig {
            api_url: config.discord_api_url.clone(),
            ..DiscordConfig::new(config.discord_token.clone(), config.channel_id)
        })
        .context("building Discord client")?,
    );

    let cycle = Arc::new(PollCycle::new(
        Arc::new(search),
        Arc::clone(&deliverer),
        Arc::new(JsonFileStateStore::new(config.state_file.clone())),
        CycleSettings {
            organizations: config.organizations.clone(),
            lookback: config.lookback,
        },
    ));
    let scheduler = Scheduler::new(
        cycle,
        deliverer,
        SchedulerSettings {
            interval: config.poll_interval,
            ..SchedulerSettings::default()
        },
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    if config.once {
        match scheduler.run_once(cancel).await? {
            Some(outcome) => info!(
                delivered = outcome.delivered,
                watermark = %outcome.watermark,
                "single cycle finished"
            ),
            None => info!("single cycle skipped"),
        }
    } else {
        scheduler.run(cancel).await?;
    }

    info!("help-relay stopped");
    Ok(())
}

/// Cancels `token` on Ctrl-C, or SIGTERM on unix.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
    token.cancel();
}

mod config;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Args, Config};
use dockwatch_core::Coordinator;
use dockwatch_docker::DockerRuntime;
use dockwatch_telegram::{TelegramClient, TelegramNotifier, TelegramPoller};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const UPDATE_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();
    let _log_guard = logging::init(args.debug, args.log_dir.as_deref());
    match dotenv {
        Ok(path) => info!(event = "dotenv_loaded", path = %path.display()),
        Err(err) if err.not_found() => {}
        Err(err) => warn!(event = "dotenv_error", error = %err),
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event = "startup_failed", error = %format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_args(args)?;

    let runtime = DockerRuntime::connect(config.docker_host.as_deref())
        .context("failed to create docker client")?;
    runtime.ping().await.context("docker daemon unreachable")?;
    info!(
        event = "docker_connected",
        host = %config.docker_host.as_deref().unwrap_or("local")
    );

    let client = Arc::new(
        TelegramClient::new(&config.telegram_token, &config.telegram_api_url)
            .context("failed to create telegram client")?,
    );
    let me = client.get_me().await.context("telegram bot token rejected")?;
    info!(
        event = "telegram_authorized",
        bot = %me.username.as_deref().unwrap_or(&me.first_name),
        chat_id = config.monitor.chat_id
    );

    let coordinator = Coordinator::new(
        Arc::new(runtime),
        Arc::new(TelegramNotifier::new(client.clone())),
        config.monitor,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE);
    let poller = tokio::spawn(TelegramPoller::new(client).run(updates_tx, shutdown_rx.clone()));

    tokio::spawn(async move {
        wait_for_signal().await;
        info!(event = "shutdown_requested");
        let _ = shutdown_tx.send(true);
    });

    info!(
        event = "dockwatch_start",
        poll_interval_s = config.monitor.poll_interval.as_secs(),
        tail_lines = config.monitor.tail_lines
    );
    coordinator.run(updates_rx, shutdown_rx).await;
    if let Err(err) = poller.await {
        warn!(event = "poller_task_failed", error = %err);
    }
    info!(event = "dockwatch_stop");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!(event = "sigterm_unavailable", error = %err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
